mod logging;

use std::process::ExitCode;

use backend_sesac::SesacBackend;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let backend = match SesacBackend::from_env() {
        Ok(backend) => backend,
        Err(err) => {
            error!(error = %err, "failed to initialize backend");
            return ExitCode::FAILURE;
        }
    };

    let session = backend.session();
    info!(
        base_url = %backend.config().base_url,
        match_status = ?session.match_status(),
        "backend initialized"
    );

    if session.credential().is_none() {
        info!("no stored credential; sign in through the app to run live smoke calls");
        return ExitCode::SUCCESS;
    }

    match backend.account().user_info().await {
        Ok(user) => {
            info!(uid = %user.uid, nick = %user.nick, "user info fetched");
            ExitCode::SUCCESS
        }
        Err(err) => {
            warn!(error = err.code(), "user info call failed");
            ExitCode::FAILURE
        }
    }
}
