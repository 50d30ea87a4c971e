use android_adb_sync::adb::{AdbResult, Session};
use android_adb_sync::args::{Args, Command, print_help};
use env_logger::Env;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = match Args::parse() {
        Ok(Some(args)) => args,
        Ok(None) => return ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("❌ {message}");
            print_help();
            return ExitCode::from(2);
        }
    };

    // RUST_LOG still wins when set.
    let level = args.settings.log_level().to_string().to_lowercase();
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("❌ Failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let session = Session::new(args.settings);
    match rt.block_on(run(&session, args.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(session: &Session, command: Command) -> AdbResult<()> {
    match command {
        Command::Devices => {
            let devices = session.devices().await?;
            println!("List of devices attached");
            for device in devices {
                println!("{device}");
            }
        }
        Command::Version => {
            println!("Android ADB Sync v{}", env!("ADB_SYNC_VERSION_DISPLAY"));
            let version = session.server_version().await?;
            println!("adb server version {version} ({version:04x})");
        }
        Command::Shell(cmd) => {
            session.shell(&cmd, None, |line| println!("{line}")).await?;
        }
        Command::Push { local, remote } => {
            let summary = session.push(&local, &remote, None).await?;
            println!("{summary}");
        }
        Command::Pull { remote, local } => {
            let summary = session.pull(&remote, local.as_deref(), None).await?;
            println!("{summary}");
        }
    }
    Ok(())
}
