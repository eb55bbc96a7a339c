//! `simrun`: run a move script through the simulated pipeline.
//!
//! The script is a plain text file, one command per line:
//!
//! ```text
//! move x10 y5 f1200      # coordinated feed to (10, 5)
//! rapid x0 y0            # traverse
//! dwell 0.5              # seconds
//! hold                   # feedhold, settle to zero
//! resume
//! ```
//!
//! Prints a JSON run summary; `--trace` additionally dumps every pulse.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use motion::{load_motor_config, Settings, AXES};
use serde::Serialize;
use sim::{IniSettings, Machine, PulseEvent};
use stepgen::MotorConfig;
use tracing::info;

/// Replay a move script against the simulated motion pipeline.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Move script to execute.
    script: PathBuf,

    /// Settings file (INI, token-keyed). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the full pulse trace into the summary.
    #[arg(long)]
    trace: bool,

    /// Tick budget before giving up on an unsettled pipeline.
    #[arg(long, default_value_t = 50_000_000)]
    max_ticks: u64,
}

#[derive(Serialize)]
struct RunSummary {
    elapsed_seconds: f64,
    ticks: u64,
    position_mm: Vec<f64>,
    pulse_counts: Vec<u64>,
    alarm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pulses: Option<Vec<PulseEvent>>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();

    let (settings, motors) = match &cli.config {
        Some(path) => {
            let source = IniSettings::load(path)?;
            (Settings::load(&source), load_motor_config(&source))
        }
        None => (Settings::default(), MotorConfig::new()),
    };

    let mut machine = Machine::new(settings, motors);
    machine.board.record_pulses = cli.trace;

    let script = std::fs::read_to_string(&cli.script)
        .with_context(|| format!("reading script {:?}", cli.script))?;
    for (lineno, line) in script.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        run_line(&mut machine, line, cli.max_ticks)
            .with_context(|| format!("script line {}: {line}", lineno + 1))?;
        if let Some(alarm) = machine.alarm() {
            bail!("machine alarmed: {alarm}");
        }
    }
    if !machine.run_until_idle(cli.max_ticks) && machine.alarm().is_none() {
        bail!("pipeline did not settle within {} ticks", cli.max_ticks);
    }

    let summary = RunSummary {
        elapsed_seconds: machine.now_seconds(),
        ticks: machine.ticks(),
        position_mm: (0..motion::MOTORS).map(|m| machine.position_mm(m)).collect(),
        pulse_counts: machine.board.pulse_count.to_vec(),
        alarm: machine.alarm().map(|a| a.to_string()),
        pulses: cli.trace.then(|| machine.board.pulses.clone()),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn run_line(machine: &mut Machine, line: &str, max_ticks: u64) -> Result<()> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().unwrap_or("").to_ascii_lowercase();
    match verb.as_str() {
        "move" | "rapid" => {
            let mut target = current_target(machine);
            let mut feed = 0.0;
            for word in parts {
                let (letter, value) = split_word(word)?;
                match letter {
                    'x' | 'y' | 'z' | 'a' | 'b' | 'c' => {
                        let axis = "xyzabc".find(letter).unwrap_or(0);
                        target[axis] = value;
                    }
                    'f' => feed = value,
                    other => bail!("unknown word letter '{other}'"),
                }
            }
            // Honor the ring gating contract before feeding a new line.
            let mut guard = 0u64;
            while machine.planner.planner_is_full() {
                machine.tick();
                guard += 1;
                if guard > max_ticks {
                    bail!("planner never drained below the headroom");
                }
            }
            if verb == "move" {
                if feed <= 0.0 {
                    bail!("move requires a positive F word");
                }
                machine.feed_move(target, feed).map_err(anyhow::Error::new)?;
            } else {
                machine.rapid_move(target).map_err(anyhow::Error::new)?;
            }
        }
        "dwell" => {
            let seconds: f64 = parts
                .next()
                .context("dwell requires a duration")?
                .parse()?;
            machine.dwell(seconds).map_err(anyhow::Error::new)?;
        }
        "hold" => {
            machine.request_feedhold();
            if !machine.run_until_hold(max_ticks) {
                bail!("hold did not settle");
            }
            info!(t = machine.now_seconds(), "held");
        }
        "resume" => machine.request_resume(),
        "flush" => machine.request_queue_flush(),
        other => bail!("unknown command '{other}'"),
    }
    Ok(())
}

fn split_word(word: &str) -> Result<(char, f64)> {
    let mut chars = word.chars();
    let letter = chars
        .next()
        .context("empty word")?
        .to_ascii_lowercase();
    let value: f64 = chars.as_str().parse().context("bad word value")?;
    Ok((letter, value))
}

fn current_target(machine: &Machine) -> [f64; AXES] {
    let mut target = [0.0; AXES];
    for (axis, t) in target.iter_mut().enumerate() {
        *t = machine.planner.planner_position(axis);
    }
    target
}
