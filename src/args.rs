use crate::config::{FileMode, Settings};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Devices,
    Push { local: PathBuf, remote: String },
    Pull { remote: String, local: Option<PathBuf> },
    Shell(String),
    Version,
}

#[derive(Debug)]
pub struct Args {
    pub command: Command,
    pub settings: Settings,
}

impl Args {
    /// Parses the process arguments on top of the environment settings.
    /// `Ok(None)` means help or version was printed and there is nothing to run.
    pub fn parse() -> Result<Option<Self>, String> {
        let args: Vec<String> = env::args().skip(1).collect();
        Self::parse_from(args, Settings::from_env())
    }

    pub fn parse_from<I>(args: I, mut settings: Settings) -> Result<Option<Self>, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let mut positional: Vec<String> = Vec::new();

        while let Some(arg) = args.next() {
            // Everything after the shell command word belongs to the command.
            if positional.first().is_some_and(|c| c == "shell") {
                positional.push(arg);
                continue;
            }
            if arg == "--help" || arg == "-h" {
                print_help();
                return Ok(None);
            } else if arg == "--version" || arg == "-v" {
                println!(
                    "Android ADB Sync v{} ({})",
                    env!("ADB_SYNC_VERSION_DISPLAY"),
                    env!("ADB_SYNC_BUILD_YEAR")
                );
                return Ok(None);
            } else if arg == "--log" {
                settings.logging = true;
            } else if arg == "--verbose" {
                settings.logging = true;
                settings.verbose = true;
            } else if arg == "-s" {
                match args.next() {
                    Some(serial) if !serial.is_empty() => settings.serial = Some(serial),
                    _ => return Err("-s requires a device serial".to_string()),
                }
            } else if let Some(val) = arg.strip_prefix("--mode=") {
                settings.file_mode =
                    FileMode::parse(val).ok_or_else(|| format!("Invalid file mode: {val}"))?;
            } else if let Some(val) = arg.strip_prefix("--port=") {
                settings.port = match val.parse::<u16>() {
                    Ok(port) if port != 0 => port,
                    _ => return Err(format!("Invalid port value: {val}")),
                };
            } else if let Some(val) = arg.strip_prefix("--host=") {
                if val.is_empty() {
                    return Err("--host requires a value".to_string());
                }
                settings.host = val.to_string();
            } else if arg.starts_with('-') {
                return Err(format!("Unknown argument: {arg}"));
            } else {
                positional.push(arg);
            }
        }

        let command = match positional.as_slice() {
            [] => return Err("Missing command".to_string()),
            [cmd] if cmd == "devices" => Command::Devices,
            [cmd] if cmd == "version" => Command::Version,
            [cmd, local, remote] if cmd == "push" => Command::Push {
                local: PathBuf::from(local),
                remote: remote.clone(),
            },
            [cmd, remote] if cmd == "pull" => Command::Pull {
                remote: remote.clone(),
                local: None,
            },
            [cmd, remote, local] if cmd == "pull" => Command::Pull {
                remote: remote.clone(),
                local: Some(PathBuf::from(local)),
            },
            [cmd, rest @ ..] if cmd == "shell" && !rest.is_empty() => Command::Shell(rest.join(" ")),
            [cmd, ..] => return Err(format!("Invalid usage of '{cmd}'")),
        };

        Ok(Some(Args { command, settings }))
    }
}

pub fn print_help() {
    println!("🤖 Android ADB Sync Tool");
    println!();
    println!("USAGE:");
    println!("    android-adb-sync [FLAGS] <COMMAND>");
    println!();
    println!("COMMANDS:");
    println!("    devices                 List devices known to the adb server");
    println!("    push LOCAL REMOTE       Copy a local file to the device");
    println!("    pull REMOTE [LOCAL]     Copy a device file to the host");
    println!("    shell CMD...            Run a command in the device shell");
    println!("    version                 Show the adb server version");
    println!();
    println!("FLAGS:");
    println!("    -s SERIAL               Target device (default: $ANDROID_SERIAL, then first listed)");
    println!("    --log                   Print protocol exchanges");
    println!("    --verbose               Print full framed requests (implies --log)");
    println!("    --mode=N|local          File mode sent on push (default: 33204, 0o100664)");
    println!("    --host=H                adb server host (default: 127.0.0.1)");
    println!("    --port=N                adb server port (default: 5037)");
    println!("    --help, -h              Show this help message");
    println!("    --version, -v           Show version information");
    println!();
    println!("EXAMPLES:");
    println!("    android-adb-sync devices");
    println!("    android-adb-sync push hello.txt /sdcard/hello.txt");
    println!("    android-adb-sync -s emulator-5554 pull /sdcard/streaming.png");
    println!("    android-adb-sync shell ls -la /sdcard");
}
