use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use clap::ArgAction::{Set, SetTrue};
use clap::Parser;
use serde::Serialize;
use tracing::{event, span, Level};
use tracing_subscriber::prelude::*;

use base::addr;
use base::prelude::*;
use channel::{
    ChannelConfiguration, ChannelTable, ConfigurationError, Context, LookupFailure, Loopback,
    LoopbackConfiguration, MemoryConfiguration, MemoryOpFailure, MemoryUnit, XioAddress,
};

const CHANNEL: ChannelNumber = ChannelNumber(0x20);
const LEVEL: InterruptLevel = InterruptLevel(0x10);
const ICB: Address = addr!(0x0100);
const STATUS_BUFFER: Address = addr!(0x0200);
const STATUS_BUFFER_LENGTH: u16 = 0x100;
const PROGRAMS: u32 = 0x0400;
const PROGRAM_SPACING: u32 = 0x20;
const SOURCE: Address = addr!(0x1000);
const DESTINATIONS: u32 = 0x2000;
const MAX_LENGTH: u16 = 0x1000;
const MAX_UNITS: u8 = 8;
const MEMORY_BYTES: usize = 0x10000;

/// Run a data-chained write and a read-back on loopback units, and
/// report the status the channel posts for each.
#[derive(Parser, Debug)]
#[clap(name = "chansim", version, about, long_about = None)]
struct Cli {
    /// Number of loopback units to attach (1 to 8).
    #[clap(action = Set, long, default_value_t = 3)]
    units: u8,

    /// Simulated latency of each loopback command, in microseconds.
    /// With 0, each command ends as soon as it is started.
    #[clap(action = Set, long, default_value_t = 25)]
    latency_us: u64,

    /// Bytes moved by the first descriptor of the data-chained write.
    #[clap(action = Set, long, default_value_t = 200)]
    first_segment: u16,

    /// Total bytes written to, and read back from, each unit.
    #[clap(action = Set, long, default_value_t = 256)]
    length: u16,

    /// Capacity of the channel's status FIFO.
    #[clap(action = Set, long, default_value_t = 16)]
    fifo_capacity: usize,

    /// Print the report as JSON.
    #[clap(action = SetTrue, long)]
    json: bool,
}

#[derive(Debug)]
enum Fail {
    InitialisationFailure(String),
    BadOption(String),
    Configuration(ConfigurationError),
    Memory(MemoryOpFailure),
    Interrupt(LookupFailure),
    Verification(String),
    Output(String),
}

impl Display for Fail {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Fail::InitialisationFailure(msg)
            | Fail::BadOption(msg)
            | Fail::Verification(msg)
            | Fail::Output(msg) => {
                f.write_str(msg.as_str())
            }
            Fail::Configuration(e) => write!(f, "configuration failed: {e}"),
            Fail::Memory(e) => write!(f, "cannot set up guest memory: {e}"),
            Fail::Interrupt(e) => write!(f, "interrupt handling failed: {e}"),
        }
    }
}

impl Error for Fail {}

impl From<ConfigurationError> for Fail {
    fn from(e: ConfigurationError) -> Fail {
        Fail::Configuration(e)
    }
}

impl From<MemoryOpFailure> for Fail {
    fn from(e: MemoryOpFailure) -> Fail {
        Fail::Memory(e)
    }
}

#[derive(Debug, Serialize)]
struct UnitReport {
    unit: UnitAddress,
    start: XioOutcome,
    condition_code: u8,
    status: Option<StatusRecord>,
    data_verified: bool,
}

impl UnitReport {
    fn is_clean(&self) -> bool {
        self.start == XioOutcome::AcceptedNoStatus
            && self.data_verified
            && self
                .status
                .is_some_and(|r| r.flags == StatusFlags::ENDS && r.residual == 0)
    }
}

#[derive(Debug, Serialize)]
struct Report {
    elapsed_us: u64,
    interrupts: usize,
    units: Vec<UnitReport>,
}

impl Report {
    fn failures(&self) -> usize {
        self.units.iter().filter(|u| !u.is_clean()).count()
    }
}

fn check_options(cli: &Cli) -> Result<(), Fail> {
    if cli.units == 0 || cli.units > MAX_UNITS {
        return Err(Fail::BadOption(format!(
            "--units must be between 1 and {MAX_UNITS}"
        )));
    }
    if cli.length == 0 || cli.length > MAX_LENGTH {
        return Err(Fail::BadOption(format!(
            "--length must be between 1 and {MAX_LENGTH}"
        )));
    }
    if cli.first_segment == 0 || cli.first_segment >= cli.length {
        return Err(Fail::BadOption(
            "--first-segment must be non-zero and shorter than --length".to_string(),
        ));
    }
    Ok(())
}

fn program_address(sub: u8) -> Address {
    Address::from_low_bits(PROGRAMS + u32::from(sub) * PROGRAM_SPACING)
}

fn destination(sub: u8) -> Address {
    Address::from_low_bits(DESTINATIONS + u32::from(sub) * u32::from(MAX_LENGTH))
}

fn source_data(length: u16) -> Vec<u8> {
    (0..length).map(|n| (n % 251) as u8).collect()
}

/// The program each unit runs: a write split over two data-chained
/// descriptors, command chained to a read of the whole length.
fn program_for(cli: &Cli, sub: u8) -> [Iocd; 3] {
    let rest = cli.length - cli.first_segment;
    [
        Iocd::new(
            Command::WRITE,
            SOURCE,
            CommandFlags::DATA_CHAIN,
            cli.first_segment,
        ),
        Iocd::new(
            Command::WRITE,
            SOURCE.wrapping_add(u32::from(cli.first_segment)),
            CommandFlags::COMMAND_CHAIN,
            rest,
        ),
        Iocd::new(Command::READ, destination(sub), CommandFlags::empty(), cli.length),
    ]
}

fn build(cli: &Cli) -> Result<(ChannelTable, MemoryUnit), Fail> {
    let mut mem = MemoryUnit::new(&MemoryConfiguration {
        size_bytes: MEMORY_BYTES,
    })?;
    let mut table = ChannelTable::new();
    table.add_channel(
        CHANNEL,
        &ChannelConfiguration {
            fifo_capacity: cli.fifo_capacity,
            interrupt: Some((LEVEL, ICB)),
            status_buffer: Some((STATUS_BUFFER, STATUS_BUFFER_LENGTH)),
        },
    )?;
    table.enable_level(LEVEL).map_err(Fail::Interrupt)?;
    mem.load(SOURCE, &source_data(cli.length))?;
    for sub in 0..cli.units {
        let device = Loopback::new(LoopbackConfiguration {
            latency: Duration::from_micros(cli.latency_us),
            ..LoopbackConfiguration::default()
        });
        table.attach(UnitAddress::new(CHANNEL.0, sub), Box::new(device))?;
        mem.load_descriptors(program_address(sub), &program_for(cli, sub))?;
    }
    Ok((table, mem))
}

/// Take every interrupt which is pending, collecting the status
/// posted for each.  Returns the number of interrupts taken.
fn service_interrupts(
    table: &mut ChannelTable,
    mem: &mut MemoryUnit,
    posted: &mut Vec<StatusRecord>,
) -> Result<usize, Fail> {
    let mut taken = 0;
    while let Some(ctx) = table.scan_levels(mem) {
        taken += 1;
        event!(
            Level::DEBUG,
            "interrupt on level {} with ICB at {}",
            ctx.level,
            ctx.icb
        );
        let record = ctx.posted;
        table.deactivate_level(ctx.level).map_err(Fail::Interrupt)?;
        match record {
            Some(record) => posted.push(record),
            None => {
                event!(
                    Level::WARN,
                    "level {} was granted but no status could be posted",
                    ctx.level
                );
                break;
            }
        }
    }
    Ok(taken)
}

fn simulate(cli: &Cli) -> Result<Report, Fail> {
    check_options(cli)?;
    let (mut table, mut mem) = build(cli)?;
    let mut ctx = Context::new(Duration::ZERO);
    let mut posted: Vec<StatusRecord> = Vec::new();
    let mut interrupts = 0;

    let mut starts = Vec::with_capacity(usize::from(cli.units));
    for sub in 0..cli.units {
        interrupts += service_interrupts(&mut table, &mut mem, &mut posted)?;
        let addr = XioAddress::new(CHANNEL.0, sub);
        let outcome = table.start_io(&ctx, &mut mem, addr, program_address(sub));
        event!(Level::INFO, "start of unit {} gave {:?}", addr, outcome);
        starts.push(outcome);
    }

    loop {
        interrupts += service_interrupts(&mut table, &mut mem, &mut posted)?;
        match table.next_completion() {
            Some(due) => {
                ctx = Context::new(due.max(ctx.simulated_time));
                table.tick(&ctx, &mut mem);
            }
            None => break,
        }
    }
    interrupts += service_interrupts(&mut table, &mut mem, &mut posted)?;

    let expected = source_data(cli.length);
    let units = (0..cli.units)
        .zip(starts)
        .map(|(sub, start)| {
            let data_verified = mem
                .dump(destination(sub), usize::from(cli.length))
                .is_ok_and(|got| got == expected.as_slice());
            UnitReport {
                unit: UnitAddress::new(CHANNEL.0, sub),
                start,
                condition_code: start.condition_code().bits(),
                status: posted.iter().copied().find(|r| r.sub == SubAddress(sub)),
                data_verified,
            }
        })
        .collect();
    Ok(Report {
        elapsed_us: u64::try_from(ctx.simulated_time.as_micros()).unwrap_or(u64::MAX),
        interrupts,
        units,
    })
}

fn print_report(report: &Report, json: bool) -> Result<(), Fail> {
    if json {
        let text = serde_json::to_string_pretty(report)
            .map_err(|e| Fail::Output(format!("cannot format report: {e}")))?;
        println!("{text}");
        return Ok(());
    }
    for unit in &report.units {
        let status = match unit.status {
            Some(r) => format!(
                "status {:?} residual {} ending {}",
                r.flags, r.residual, r.ending_address
            ),
            None => "no status".to_string(),
        };
        println!(
            "unit {}: start {:?} (cc {:04b}), {}, data {}",
            unit.unit,
            unit.start,
            unit.condition_code,
            status,
            if unit.data_verified { "ok" } else { "MISMATCH" }
        );
    }
    println!(
        "{} interrupts in {} simulated microseconds",
        report.interrupts, report.elapsed_us
    );
    Ok(())
}

fn run_simulator() -> Result<(), Fail> {
    let cli = Cli::parse();

    // See
    // https://docs.rs/tracing-subscriber/0.2.19/tracing_subscriber/fmt/index.html#filtering-events-with-environment-variables
    // for instructions on how to select which trace messages get
    // printed.
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    let filter_layer = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
    {
        Err(e) => {
            return Err(Fail::InitialisationFailure(format!(
                "failed to initialise tracing filter (perhaps there is a problem with environment variables): {e}"
            )));
        }
        Ok(layer) => layer,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let span = span!(Level::ERROR, "chansim", units = cli.units, latency_us = cli.latency_us);
    let _enter = span.enter();
    let report = simulate(&cli)?;
    print_report(&report, cli.json)?;
    match report.failures() {
        0 => Ok(()),
        n => Err(Fail::Verification(format!(
            "{n} of {} units did not complete cleanly",
            report.units.len()
        ))),
    }
}

fn main() {
    match run_simulator() {
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}

#[cfg(test)]
fn options(latency_us: u64) -> Cli {
    Cli {
        units: 3,
        latency_us,
        first_segment: 200,
        length: 256,
        fifo_capacity: 16,
        json: false,
    }
}

#[test]
fn test_every_unit_completes_with_delayed_commands() {
    let report = simulate(&options(25)).expect("simulation should run");
    assert_eq!(report.failures(), 0);
    assert_eq!(report.units.len(), 3);
    assert_eq!(report.interrupts, 3);
    // Each unit's write and read take one latency period each.
    assert_eq!(report.elapsed_us, 50);
    for unit in &report.units {
        let status = unit.status.expect("every unit should post status");
        assert_eq!(status.ending_address, program_address(unit.unit.sub.0).wrapping_add(24));
    }
}

#[test]
fn test_every_unit_completes_with_immediate_commands() {
    let report = simulate(&options(0)).expect("simulation should run");
    assert_eq!(report.failures(), 0);
    assert_eq!(report.elapsed_us, 0);
    assert_eq!(report.interrupts, 3);
}

#[test]
fn test_small_fifo_loses_status() {
    let cli = Cli {
        fifo_capacity: 1,
        ..options(10)
    };
    let report = simulate(&cli).expect("simulation should run");
    assert_eq!(report.failures(), 2);
    assert!(report.units.iter().all(|u| u.data_verified));
}

#[test]
fn test_bad_options_are_rejected() {
    let cli = Cli {
        first_segment: 256,
        ..options(0)
    };
    assert!(matches!(simulate(&cli), Err(Fail::BadOption(_))));
    let cli = Cli {
        units: 9,
        ..options(0)
    };
    assert!(matches!(simulate(&cli), Err(Fail::BadOption(_))));
}

#[test]
fn test_command_line_parses() {
    let cli = Cli::try_parse_from(["chansim", "--units", "2", "--latency-us", "0", "--json"])
        .expect("arguments should parse");
    assert_eq!(cli.units, 2);
    assert_eq!(cli.latency_us, 0);
    assert_eq!(cli.length, 256);
    assert!(cli.json);
}
