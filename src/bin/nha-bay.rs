//! nha-bay - container launcher for the framework's workloads
//!
//! ## Usage
//!
//! ```sh
//! nha-bay isle setup <name> [--skip-build] [--tasks N]
//! nha-bay isle build <name>
//! nha-bay note <project> [--port N] [--tag T]
//! ```
//!
//! The backend (`swarm` or `kube`) comes from `captain.type` in the
//! configuration file, read from `$NHA_CONF` or `~/.nha/nha.yaml`.

use noronha_bay::captain::{DockerCli, EngineApi, get_captain};
use noronha_bay::{
    Compass, Expedition, ImageSpec, Island, LaunchOptions, LogContext, NotebookMission,
    SECTION_IDE, SECTION_ISLE, ShortExpedition, get_island,
};
use std::process::ExitCode;
use std::sync::Arc;

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Debug, PartialEq, Eq)]
enum Command {
    IsleSetup {
        name: String,
        skip_build: bool,
        tasks: u32,
    },
    IsleBuild {
        name: String,
    },
    Note {
        project: String,
        port: Option<u16>,
        tag: String,
    },
    Version,
    Help,
}

fn flag_value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_args(args: &[String]) -> Result<Command, String> {
    if args.len() < 2 {
        return Ok(Command::Help);
    }

    match args[1].as_str() {
        "isle" => {
            let action = args.get(2).ok_or("isle requires <setup|build>")?;
            let name = args
                .get(3)
                .cloned()
                .ok_or_else(|| format!("isle {action} requires <name>"))?;

            match action.as_str() {
                "setup" => {
                    let mut skip_build = false;
                    let mut tasks = 1;
                    let mut i = 4;
                    while i < args.len() {
                        match args[i].as_str() {
                            "--skip-build" => {
                                skip_build = true;
                                i += 1;
                            }
                            "--tasks" => {
                                let value = flag_value(args, i, "--tasks")?;
                                tasks = value
                                    .parse()
                                    .map_err(|_| format!("invalid --tasks: {value}"))?;
                                i += 2;
                            }
                            _ => i += 1,
                        }
                    }
                    Ok(Command::IsleSetup {
                        name,
                        skip_build,
                        tasks,
                    })
                }
                "build" => Ok(Command::IsleBuild { name }),
                unknown => Err(format!("unknown isle action: {unknown}")),
            }
        }
        "note" => {
            let project = args.get(2).cloned().ok_or("note requires <project>")?;
            let mut port = None;
            let mut tag = noronha_bay::LATEST.to_string();
            let mut i = 3;
            while i < args.len() {
                match args[i].as_str() {
                    "--port" | "-p" => {
                        let value = flag_value(args, i, "--port")?;
                        port = Some(value.parse().map_err(|_| format!("invalid --port: {value}"))?);
                        i += 2;
                    }
                    "--tag" | "-t" => {
                        tag = flag_value(args, i, "--tag")?.to_string();
                        i += 2;
                    }
                    _ => i += 1,
                }
            }
            Ok(Command::Note { project, port, tag })
        }
        "version" | "--version" | "-v" => Ok(Command::Version),
        "help" | "--help" | "-h" => Ok(Command::Help),
        unknown => Err(format!("unknown command: {unknown}")),
    }
}

// =============================================================================
// Commands
// =============================================================================

async fn cmd_isle(
    compass: &Compass,
    log: LogContext,
    name: &str,
    tasks: u32,
    skip_build: bool,
    just_build: bool,
) -> noronha_bay::Result<()> {
    let kind = get_island(name)?;
    let captain = get_captain(SECTION_ISLE, compass).await?;
    let engine: Arc<dyn EngineApi> = Arc::new(DockerCli::new());

    let mut island = Island::new(kind, compass, captain, engine, log)?;
    island.launch(tasks, skip_build, just_build).await?;
    Ok(())
}

async fn cmd_note(
    compass: &Compass,
    log: LogContext,
    project: &str,
    port: Option<u16>,
    tag: &str,
) -> noronha_bay::Result<()> {
    let mut mission = NotebookMission::new(project);
    if let Some(port) = port {
        mission = mission.with_port(port);
    }

    let captain = get_captain(SECTION_IDE, compass).await?;
    let img = ImageSpec::for_project(&compass.docker, project, tag);
    let expedition = Expedition::new(mission, img, compass, captain, log)?;

    ShortExpedition::new(expedition)
        .launch(&LaunchOptions::default())
        .await?;
    Ok(())
}

fn cmd_version() {
    println!("nha-bay version {}", env!("CARGO_PKG_VERSION"));
}

fn cmd_help() {
    println!(
        r#"nha-bay - launch notebooks and framework services as containers

USAGE:
    nha-bay <command> [options]

COMMANDS:
    isle setup <name>     Build and deploy an island (mongo, artif, nexus, router)
    isle build <name>     Only build the island's image
    note <project>        Start a notebook for a project
    version               Show version info
    help                  Show this help

OPTIONS:
    --skip-build          Reuse the existing island image
    --tasks <n>           Replicas of the island (default: 1)
    --port, -p <port>     Host port of the notebook (default: 30088)
    --tag, -t <tag>       Project image tag (default: latest)

EXAMPLES:
    nha-bay isle setup mongo
    nha-bay note iris --port 30001
"#
    );
}

// =============================================================================
// Main
// =============================================================================

fn run(cmd: Command) -> noronha_bay::Result<()> {
    let compass = Compass::discover()?;
    let log = LogContext::new(&compass.logger);
    log.install()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async {
        match cmd {
            Command::IsleSetup {
                name,
                skip_build,
                tasks,
            } => cmd_isle(&compass, log.clone(), &name, tasks, skip_build, false).await,
            Command::IsleBuild { name } => {
                cmd_isle(&compass, log.clone(), &name, 1, false, true).await
            }
            Command::Note { project, port, tag } => {
                cmd_note(&compass, log.clone(), &project, port, &tag).await
            }
            Command::Version | Command::Help => Ok(()),
        }
    });

    if let Err(e) = &result {
        eprintln!("{}", log.render_error(e));
    }
    result
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    match parse_args(&args) {
        Ok(Command::Version) => {
            cmd_version();
            ExitCode::SUCCESS
        }
        Ok(Command::Help) => {
            cmd_help();
            ExitCode::SUCCESS
        }
        Ok(cmd) => match run(cmd) {
            Ok(()) => ExitCode::SUCCESS,
            Err(_) => ExitCode::FAILURE,
        },
        Err(e) => {
            eprintln!("error: {e}");
            cmd_help();
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(line: &str) -> Vec<String> {
        std::iter::once("nha-bay")
            .chain(line.split_whitespace())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_parse_isle_setup() {
        let cmd = parse_args(&argv("isle setup mongo --skip-build --tasks 2")).unwrap();
        assert_eq!(
            cmd,
            Command::IsleSetup {
                name: "mongo".to_string(),
                skip_build: true,
                tasks: 2,
            }
        );
    }

    #[test]
    fn test_parse_note_defaults() {
        let cmd = parse_args(&argv("note iris")).unwrap();
        assert_eq!(
            cmd,
            Command::Note {
                project: "iris".to_string(),
                port: None,
                tag: "latest".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&argv("isle setup")).is_err());
        assert!(parse_args(&argv("note iris --port abc")).is_err());
        assert!(parse_args(&argv("sail")).is_err());
        assert_eq!(parse_args(&argv("")).unwrap(), Command::Help);
    }
}
