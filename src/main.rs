use anyhow::{bail, Context, Result};
use arm_controller::{
    constants::BAUD_RATE, Angle, ArmConfig, Controller, JointId, MotionMode, SequenceOutcome, SequenceStatus,
    SerialTransport,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "arm_controller")]
#[command(about = "Drive a serial servo arm", long_about = None)]
#[command(version)]
struct Cli {
    /// Serial port of the servo board (e.g. /dev/ttyUSB0)
    #[arg(short, long, global = true)]
    port: Option<String>,

    #[arg(short, long, default_value_t = BAUD_RATE, global = true)]
    baud: u32,

    /// TOML file with joint limits and sequences
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Run without hardware; moves only update the session state
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Move one joint
    #[command(allow_negative_numbers = true)]
    Move {
        joint: JointId,
        angle: Angle,
        /// Interpolate over this many milliseconds instead of jumping
        #[arg(long)]
        smooth: Option<u64>,
    },
    /// Run a named sequence
    Run { name: String },
    /// Return every joint to its home angle
    Home,
    /// List the configured sequences
    List,
    /// Read commands from stdin
    Shell,
}

#[derive(Debug, PartialEq, Eq)]
enum ShellCommand {
    Move { joint: JointId, angle: Angle, smooth: Option<u64> },
    Run(String),
    Home,
    Stop,
    Status,
    List,
    Help,
    Quit,
}

const SHELL_HELP: &str = "commands:
  move <joint> <angle>          jump a joint to an angle
  smooth <joint> <angle> [ms]   interpolate a joint to an angle
  run <sequence>                run a named sequence in the background
  home                          return every joint home
  stop                          cancel the running sequence
  status | list | help | quit";

fn parse_line(line: &str) -> Result<ShellCommand, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let joint_angle = |joint: Option<&&str>, angle: Option<&&str>| -> Result<(JointId, Angle), String> {
        let joint = joint.ok_or("missing joint")?;
        let joint = JointId::from_str(joint).map_err(|_| format!("unknown joint {:?}", joint))?;
        let angle = angle.ok_or("missing angle")?;
        let angle = angle.parse().map_err(|_| format!("bad angle {:?}", angle))?;
        Ok((joint, angle))
    };

    match words.as_slice() {
        ["move", rest @ ..] => {
            let (joint, angle) = joint_angle(rest.first(), rest.get(1))?;
            Ok(ShellCommand::Move { joint, angle, smooth: None })
        }
        ["smooth", rest @ ..] => {
            let (joint, angle) = joint_angle(rest.first(), rest.get(1))?;
            let duration = match rest.get(2) {
                Some(ms) => ms.parse().map_err(|_| format!("bad duration {:?}", ms))?,
                None => arm_controller::constants::DEFAULT_SMOOTH_MS,
            };
            Ok(ShellCommand::Move {
                joint,
                angle,
                smooth: Some(duration),
            })
        }
        ["run", name] => Ok(ShellCommand::Run(name.to_string())),
        ["home"] => Ok(ShellCommand::Home),
        ["stop"] => Ok(ShellCommand::Stop),
        ["status"] => Ok(ShellCommand::Status),
        ["list"] => Ok(ShellCommand::List),
        ["help"] | ["?"] => Ok(ShellCommand::Help),
        ["quit"] | ["exit"] => Ok(ShellCommand::Quit),
        [] => Err(String::new()),
        _ => Err(format!("unrecognised command {:?} (try help)", line.trim())),
    }
}

fn mode(smooth: Option<u64>) -> MotionMode {
    smooth.map(MotionMode::smooth).unwrap_or(MotionMode::Instant)
}

fn print_outcome(outcome: &SequenceOutcome) {
    match outcome.status {
        SequenceStatus::Completed => println!("{} completed ({} steps)", outcome.name, outcome.steps_executed),
        SequenceStatus::Cancelled { at_step } => println!("{} cancelled before step {}", outcome.name, at_step),
    }
    if outcome.write_failures > 0 {
        println!("{} writes failed", outcome.write_failures);
    }
}

fn print_status(controller: &Controller) {
    let snap = controller.snapshot();
    println!("link: {:?}", snap.link);
    for joint in JointId::iter() {
        println!("  {:<8} {:>3}", joint, snap.position(joint));
    }
    if let Some(name) = snap.active_sequence {
        println!("running: {}", name);
    }
}

fn print_sequences(controller: &Controller) {
    for name in controller.sequence_names() {
        let steps = controller.sequence(&name).map(|s| s.steps().len()).unwrap_or_default();
        println!("{:<12} {} steps", name, steps);
    }
}

async fn open_link(cli: &Cli, controller: &Controller) -> Result<Option<Arc<SerialTransport>>> {
    if cli.simulate {
        controller.simulate(true);
        return Ok(None);
    }
    let Some(port) = &cli.port else {
        bail!("no --port given (use --simulate to run without hardware)");
    };
    println!("Opening {}...", port);
    let transport = Arc::new(
        SerialTransport::open(port, cli.baud)
            .await
            .with_context(|| format!("failed to open {}", port))?,
    );
    controller.connect(transport.clone());
    Ok(Some(transport))
}

async fn shell(controller: &Controller) -> Result<()> {
    println!("{}", SHELL_HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                controller.stop();
                println!();
                break;
            }
        };
        let Some(line) = line else { break };

        let command = match parse_line(&line) {
            Ok(command) => command,
            Err(msg) if msg.is_empty() => continue,
            Err(msg) => {
                println!("{}", msg);
                continue;
            }
        };

        match command {
            ShellCommand::Move { joint, angle, smooth } => {
                match controller.move_joint(joint, angle, mode(smooth), false) {
                    Ok(outcome) => println!("{} -> {} ({:?})", joint, controller.snapshot().position(joint), outcome),
                    Err(e) => println!("{}", e),
                }
            }
            ShellCommand::Run(name) => {
                let controller = controller.clone();
                tokio::spawn(async move {
                    match controller.run_sequence(&name).await {
                        Ok(outcome) => print_outcome(&outcome),
                        Err(e) => println!("{}", e),
                    }
                });
            }
            ShellCommand::Home => {
                let controller = controller.clone();
                tokio::spawn(async move {
                    match controller.go_home().await {
                        Ok(()) => println!("home"),
                        Err(e) => println!("{}", e),
                    }
                });
            }
            ShellCommand::Stop => {
                if !controller.stop() {
                    println!("nothing running");
                }
            }
            ShellCommand::Status => print_status(controller),
            ShellCommand::List => print_sequences(controller),
            ShellCommand::Help => println!("{}", SHELL_HELP),
            ShellCommand::Quit => {
                controller.stop();
                break;
            }
        }
    }
    Ok(())
}

async fn run(cli: Cli, controller: &Controller) -> Result<()> {
    match cli.command {
        Commands::Move { joint, angle, smooth } => {
            let outcome = controller.move_joint(joint, angle, mode(smooth), false)?;
            println!("{} -> {} ({:?})", joint, controller.snapshot().position(joint), outcome);
        }
        Commands::Run { name } => {
            let outcome = controller.run_sequence(&name).await?;
            print_outcome(&outcome);
        }
        Commands::Home => controller.go_home().await?,
        Commands::Shell => shell(controller).await?,
        Commands::List => print_sequences(controller),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arm_controller=info")))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ArmConfig::load(path)?,
        None => ArmConfig::default(),
    };
    let controller = Controller::new(&config)?;

    if let Commands::List = cli.command {
        print_sequences(&controller);
        return Ok(());
    }

    let serial = open_link(&cli, &controller).await?;
    let result = run(cli, &controller).await;

    controller.disconnect();
    if let Some(serial) = serial {
        serial.close();
    }

    result
}
