mod bootstrap;
mod session;

use tracing::{error, info};

fn main() {
    bootstrap::init_tracing();
    info!("=== tileworld sandbox ===");

    let result = bootstrap::load_config_from_env().and_then(|config| {
        let root = bootstrap::resolve_root()?;
        info!(root = %root.display(), save = %config.world.save_name, "sandbox_root_resolved");
        session::run_session(&root, &config)
    });
    if let Err(err) = result {
        error!(error = %err, "sandbox_failed");
        std::process::exit(1);
    }
}
