use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    /// Run one step script until it stops itself
    Run(PathBuf),
    /// Run scripts in sequence
    Queue(Vec<PathBuf>),
    /// Only the background action set
    Background,
    Screenshot,
    Devices,
}

#[derive(Debug, PartialEq)]
pub struct Args {
    pub mode: Mode,
    pub config_path: PathBuf,
    pub background: Option<PathBuf>,
    pub queue_repeats: u32,
    pub debug_mode: bool,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, PartialEq)]
pub enum Parsed {
    Run(Args),
    Help,
    Version,
}

impl Args {
    pub fn parse() -> Option<Self> {
        match Self::parse_from(env::args().skip(1)) {
            Ok(Parsed::Run(args)) => Some(args),
            Ok(Parsed::Help) => {
                print_help();
                None
            }
            Ok(Parsed::Version) => {
                println!(
                    "Android Macro Run v{} (built {})",
                    env!("APP_VERSION_DISPLAY"),
                    env!("APP_BUILD_YEAR")
                );
                None
            }
            Err(message) => {
                eprintln!("❌ {message}");
                print_help();
                None
            }
        }
    }

    pub fn parse_from(args: impl IntoIterator<Item = String>) -> Result<Parsed, String> {
        let mut mode: Option<Mode> = None;
        let mut config_path = PathBuf::from("config.yaml");
        let mut background: Option<PathBuf> = None;
        let mut queue_repeats: u32 = 1;
        let mut debug_mode = false;
        let mut timeout_secs: Option<u64> = None;

        for arg in args {
            if arg == "--help" || arg == "-h" {
                return Ok(Parsed::Help);
            } else if arg == "--version" || arg == "-v" {
                return Ok(Parsed::Version);
            } else if arg == "--debug" {
                debug_mode = true;
            } else if arg == "--screenshot" || arg == "-s" {
                mode = Some(Mode::Screenshot);
            } else if arg == "--devices" {
                mode = Some(Mode::Devices);
            } else if let Some(path) = arg.strip_prefix("--config=") {
                config_path = PathBuf::from(path);
            } else if let Some(path) = arg.strip_prefix("--run=") {
                mode = Some(Mode::Run(PathBuf::from(path)));
            } else if let Some(list) = arg.strip_prefix("--queue=") {
                let paths: Vec<PathBuf> = list
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect();
                if paths.is_empty() {
                    return Err("--queue needs at least one script".to_string());
                }
                mode = Some(Mode::Queue(paths));
            } else if let Some(val) = arg.strip_prefix("--queue-repeats=") {
                queue_repeats = match val.parse::<u32>() {
                    Ok(n) if n > 0 => n,
                    _ => return Err(format!("Invalid queue repeat count: {val}")),
                };
            } else if let Some(path) = arg.strip_prefix("--background=") {
                background = Some(PathBuf::from(path));
            } else if let Some(val) = arg.strip_prefix("--timeout=") {
                match val.parse::<u64>() {
                    Ok(secs) => timeout_secs = Some(secs),
                    Err(_) => return Err(format!("Invalid timeout value: {val}")),
                }
            } else {
                return Err(format!("Unknown argument: {arg}"));
            }
        }

        let mode = match (mode, &background) {
            (Some(mode), _) => mode,
            (None, Some(_)) => Mode::Background,
            (None, None) => return Ok(Parsed::Help),
        };

        Ok(Parsed::Run(Args {
            mode,
            config_path,
            background,
            queue_repeats,
            debug_mode,
            timeout_secs,
        }))
    }
}

fn print_help() {
    println!("🤖 Android Macro Run");
    println!();
    println!("USAGE:");
    println!("    android-macro-run [FLAGS]");
    println!();
    println!("FLAGS:");
    println!("    --run=SCRIPT          Run a step script (YAML)");
    println!("    --queue=A,B,...       Run scripts in sequence");
    println!("    --queue-repeats=N     Repeat the whole queue N times (default 1)");
    println!("    --background=SET      Run a background action set alongside (or alone)");
    println!("    --screenshot, -s      Save a screenshot to cli-screenshot.png");
    println!("    --devices             List attached devices");
    println!("    --config=PATH         Config file (default config.yaml)");
    println!("    --debug               Enable debug logging");
    println!("    --timeout=N           Stop everything after N seconds");
    println!("    --help, -h            Show this help message");
    println!("    --version, -v         Show version information");
    println!();
    println!("EXAMPLES:");
    println!("    android-macro-run --run=macros/daily.yaml");
    println!("    android-macro-run --queue=a.yaml,b.yaml --queue-repeats=3");
    println!("    android-macro-run --background=actions/farm.yaml --timeout=600");
    println!("    android-macro-run --screenshot");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Parsed, String> {
        Args::parse_from(args.iter().map(|a| a.to_string()))
    }

    #[test]
    fn run_with_background_and_timeout() {
        let Ok(Parsed::Run(args)) = parse(&[
            "--run=daily.yaml",
            "--background=farm.yaml",
            "--timeout=60",
            "--debug",
        ]) else {
            panic!("expected run");
        };
        assert_eq!(args.mode, Mode::Run(PathBuf::from("daily.yaml")));
        assert_eq!(args.background, Some(PathBuf::from("farm.yaml")));
        assert_eq!(args.timeout_secs, Some(60));
        assert!(args.debug_mode);
        assert_eq!(args.config_path, PathBuf::from("config.yaml"));
    }

    #[test]
    fn queue_list_and_repeats() {
        let Ok(Parsed::Run(args)) = parse(&["--queue=a.yaml, b.yaml", "--queue-repeats=3"]) else {
            panic!("expected queue");
        };
        assert_eq!(
            args.mode,
            Mode::Queue(vec![PathBuf::from("a.yaml"), PathBuf::from("b.yaml")])
        );
        assert_eq!(args.queue_repeats, 3);
    }

    #[test]
    fn background_alone_selects_background_mode() {
        let Ok(Parsed::Run(args)) = parse(&["--background=farm.yaml"]) else {
            panic!("expected background");
        };
        assert_eq!(args.mode, Mode::Background);
    }

    #[test]
    fn bad_input_is_rejected() {
        assert!(parse(&["--timeout=soon"]).is_err());
        assert!(parse(&["--queue-repeats=0"]).is_err());
        assert!(parse(&["--queue="]).is_err());
        assert!(parse(&["--frobnicate"]).is_err());
        assert_eq!(parse(&[]), Ok(Parsed::Help));
        assert_eq!(parse(&["--run=x.yaml", "--version"]), Ok(Parsed::Version));
    }
}
