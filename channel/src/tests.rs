use core::time::Duration;
use std::cell::Cell;
use std::rc::Rc;

use base::addr;
use base::prelude::*;
use test_strategy::proptest;

use super::{
    ChannelConfiguration, ChannelTable, Completion, Context, DeferredCompletion, Device,
    LevelOwner, LevelState, Loopback, LoopbackConfiguration, MemoryConfiguration, MemoryUnit,
    PreCheck, ProgramOutcome, Subchannel, TransferState, XioAddress, XioOp,
    SENSE_COMMAND_REJECT,
};

const CH: ChannelNumber = ChannelNumber(0x20);
const LEVEL: InterruptLevel = InterruptLevel(0x10);
const ICB: Address = addr!(0x0100);
const STATUS_BUFFER: Address = addr!(0x0200);
const DATA: Address = addr!(0x1000);

fn unit(sub: u8) -> UnitAddress {
    UnitAddress::new(CH.0, sub)
}

fn xio(sub: u8) -> XioAddress {
    XioAddress::new(CH.0, sub)
}

fn a(n: u32) -> Address {
    Address::try_from(n).expect("test address should be in range")
}

fn iocd(command: Command, address: u32, flags: CommandFlags, count: u16) -> Iocd {
    Iocd::new(command, a(address), flags, count)
}

fn no_flags() -> CommandFlags {
    CommandFlags::empty()
}

fn loopback_with_latency(us: u64) -> Box<Loopback> {
    Box::new(Loopback::new(LoopbackConfiguration {
        latency: Duration::from_micros(us),
        ..LoopbackConfiguration::default()
    }))
}

/// A channel with an interrupt level and a status buffer, plus
/// guest memory and a clock.
struct Rig {
    ctx: Context,
    mem: MemoryUnit,
    table: ChannelTable,
}

impl Rig {
    fn with_config(config: &ChannelConfiguration) -> Rig {
        let mem = MemoryUnit::new(&MemoryConfiguration {
            size_bytes: 0x10000,
        })
        .expect("test memory configuration should be valid");
        let mut table = ChannelTable::new();
        table
            .add_channel(CH, config)
            .expect("test channel configuration should be valid");
        if config.interrupt.is_some() {
            table
                .enable_level(LEVEL)
                .expect("channel level should be configured");
        }
        Rig {
            ctx: Context::new(Duration::from_micros(1000)),
            mem,
            table,
        }
    }

    fn new(fifo_capacity: usize) -> Rig {
        Rig::with_config(&ChannelConfiguration {
            fifo_capacity,
            interrupt: Some((LEVEL, ICB)),
            status_buffer: Some((STATUS_BUFFER, 64)),
        })
    }

    fn attach(&mut self, sub: u8, device: Box<dyn Device>) {
        self.table
            .attach(unit(sub), device)
            .expect("test unit should attach");
    }

    fn program(&mut self, at: u32, list: &[Iocd]) -> Address {
        self.mem
            .load_descriptors(a(at), list)
            .expect("test program should fit in memory");
        a(at)
    }

    fn data(&mut self, at: Address, bytes: &[u8]) {
        self.mem
            .load(at, bytes)
            .expect("test data should fit in memory");
    }

    fn dump(&self, at: u32, len: usize) -> Vec<u8> {
        self.mem
            .dump(a(at), len)
            .expect("test range should be mapped")
            .to_vec()
    }

    fn start(&mut self, sub: u8, list: Address) -> XioOutcome {
        self.table.start_io(&self.ctx, &mut self.mem, xio(sub), list)
    }

    fn xio(&mut self, op: XioOp, sub: u8) -> XioOutcome {
        self.table
            .execute_xio(&self.ctx, &mut self.mem, op, xio(sub), Address::ZERO)
    }

    fn advance(&mut self, us: u64) -> Option<Duration> {
        self.ctx = self.ctx.advanced_by(Duration::from_micros(us));
        self.table.tick(&self.ctx, &mut self.mem)
    }

    /// Post every queued status record.
    fn drain(&mut self) -> Vec<StatusRecord> {
        let mut result = Vec::new();
        while let Some(record) = self
            .table
            .post_status(CH, StatusFlags::empty(), &mut self.mem)
        {
            result.push(record);
        }
        result
    }

    fn status_words(&self, slot: u32) -> [u32; 2] {
        let at = STATUS_BUFFER.wrapping_add(slot * STATUS_RECORD_SIZE);
        [
            self.mem.fetch_word(at).expect("status slot should be mapped"),
            self.mem
                .fetch_word(at.wrapping_add(4))
                .expect("status slot should be mapped"),
        ]
    }
}

fn record(sub: u8, ending: u32, flags: StatusFlags, residual: u16) -> StatusRecord {
    StatusRecord {
        sub: SubAddress(sub),
        ending_address: a(ending),
        flags,
        residual,
    }
}

/// A device whose behaviour is set by the test.
#[derive(Debug, Default)]
struct Scripted {
    /// Shared so that a test can change it while the device is
    /// attached.
    pre_check: Rc<Cell<Option<PreCheck>>>,
    queue: Option<usize>,
    /// Returned from start_command; when empty, a completion is
    /// scheduled instead.
    start_status: StatusFlags,
    halt_hook: Option<StatusFlags>,
    stop_hook: Option<StatusFlags>,
    unsupported: Option<XioOp>,
    /// When set, the device walks the list itself: it fetches
    /// `walk` descriptors and then reports this outcome.
    walker: Option<ProgramOutcome>,
    walk: usize,
    fired: u32,
}

impl DeferredCompletion for Scripted {
    fn fire(&mut self, _sub: SubAddress, _io: &mut Subchannel<'_>) -> Completion {
        self.fired += 1;
        Completion::End(StatusFlags::ENDS)
    }
}

impl Device for Scripted {
    fn name(&self) -> String {
        "scripted".to_string()
    }

    fn pre_check(&mut self, _sub: SubAddress) -> PreCheck {
        self.pre_check.get().unwrap_or(PreCheck::Ready)
    }

    fn start_queue_capacity(&self) -> Option<usize> {
        self.queue
    }

    fn start_command(
        &mut self,
        _sub: SubAddress,
        _command: Command,
        io: &mut Subchannel<'_>,
    ) -> StatusFlags {
        if self.start_status.is_empty() {
            io.complete_after(Duration::from_micros(10));
        }
        self.start_status
    }

    fn supports(&self, op: XioOp) -> bool {
        self.unsupported != Some(op)
    }

    fn halt(&mut self, _sub: SubAddress, _io: &mut Subchannel<'_>) -> Option<StatusFlags> {
        self.halt_hook
    }

    fn stop(&mut self, _sub: SubAddress, _io: &mut Subchannel<'_>) -> Option<StatusFlags> {
        self.stop_hook
    }

    fn iocl_override(&mut self, _sub: SubAddress, io: &mut Subchannel<'_>) -> Option<ProgramOutcome> {
        let outcome = self.walker?;
        for _ in 0..self.walk {
            if io.fetch_next(false).is_err() {
                return Some(ProgramOutcome::Failed);
            }
        }
        Some(outcome)
    }
}

#[test]
fn test_one_record_per_start_with_command_chaining() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    let data: Vec<u8> = (0..16).collect();
    rig.data(DATA, &data);
    let list = rig.program(
        0x400,
        &[
            iocd(Command::WRITE, 0x1000, CommandFlags::COMMAND_CHAIN, 16),
            iocd(Command::NOP, 0, CommandFlags::COMMAND_CHAIN, 0),
            iocd(Command::READ, 0x2000, no_flags(), 16),
        ],
    );
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Empty));
    assert_eq!(rig.table.queued_status_count(CH), 1);
    assert_eq!(rig.table.level_state(LEVEL), Some(LevelState::Requested));
    assert_eq!(rig.dump(0x2000, 16), data);

    let ctx = rig
        .table
        .scan_levels(&mut rig.mem)
        .expect("the channel level should be granted");
    assert_eq!(ctx.level, LEVEL);
    assert_eq!(ctx.icb, ICB);
    assert_eq!(ctx.owner, LevelOwner::Channel(CH));
    assert_eq!(ctx.posted, Some(record(0, 0x418, StatusFlags::ENDS, 0)));
    assert_eq!(rig.status_words(0), [0x0000_0418, 0x000C_0000]);
    assert_eq!(rig.table.queued_status_count(CH), 0);
}

#[test]
fn test_start_while_in_flight_without_queue_is_busy() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(100));
    let list = rig.program(0x400, &[iocd(Command::WRITE, 0x1000, no_flags(), 8)]);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Busy));
    assert!(rig.table.has_completion(unit(0)));

    let other = record(1, 0x999, StatusFlags::ENDS, 0);
    assert_eq!(rig.table.push_status_front(CH, other), Ok(()));
    assert_eq!(rig.start(0, list), XioOutcome::Busy);
    assert_eq!(rig.table.queued_status_count(CH), 1);
    assert_eq!(rig.xio(XioOp::TestIo, 0), XioOutcome::StatusStored);
    assert_eq!(rig.table.queued_status_count(CH), 0);
}

#[test]
fn test_queued_start_runs_when_first_program_ends() {
    let mut rig = Rig::new(4);
    rig.attach(
        0,
        Box::new(Loopback::new(LoopbackConfiguration {
            latency: Duration::from_micros(50),
            queue_capacity: Some(2),
            require_inch: false,
        })),
    );
    let data = [9_u8, 8, 7, 6, 5, 4, 3, 2];
    rig.data(DATA, &data);
    let first = rig.program(0x400, &[iocd(Command::WRITE, 0x1000, no_flags(), 8)]);
    let second = rig.program(0x500, &[iocd(Command::READ, 0x2000, no_flags(), 8)]);
    assert_eq!(rig.start(0, first), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.start(0, second), XioOutcome::AcceptedQueued);
    assert_eq!(rig.table.pending_start_count(unit(0)), 1);

    assert_eq!(rig.advance(50), Some(Duration::from_micros(1100)));
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Busy));
    assert_eq!(rig.table.pending_start_count(unit(0)), 0);
    assert_eq!(rig.table.queued_status_count(CH), 1);

    assert_eq!(rig.advance(50), None);
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Empty));
    assert_eq!(rig.dump(0x2000, 8), data.to_vec());
    assert_eq!(
        rig.drain(),
        vec![
            record(0, 0x408, StatusFlags::ENDS, 0),
            record(0, 0x508, StatusFlags::ENDS, 0),
        ]
    );
}

#[test]
fn test_full_pending_queue_answers_busy() {
    let mut rig = Rig::new(4);
    rig.attach(
        0,
        Box::new(Loopback::new(LoopbackConfiguration {
            latency: Duration::from_micros(50),
            queue_capacity: Some(1),
            require_inch: false,
        })),
    );
    let list = rig.program(0x400, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    let write = rig.program(0x500, &[iocd(Command::WRITE, 0x1000, no_flags(), 1)]);
    assert_eq!(rig.start(0, write), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedQueued);
    assert_eq!(rig.start(0, list), XioOutcome::Busy);
    assert_eq!(rig.table.pending_start_count(unit(0)), 1);
}

#[test]
fn test_fifo_overflow_drops_the_newest_record() {
    let mut rig = Rig::new(2);
    rig.attach(
        0,
        Box::new(Loopback::new(LoopbackConfiguration {
            latency: Duration::from_micros(10),
            queue_capacity: Some(3),
            require_inch: false,
        })),
    );
    let first = rig.program(0x400, &[iocd(Command::WRITE, 0x1000, no_flags(), 4)]);
    let second = rig.program(0x500, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    let third = rig.program(0x600, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    assert_eq!(rig.start(0, first), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.start(0, second), XioOutcome::AcceptedQueued);
    assert_eq!(rig.start(0, third), XioOutcome::AcceptedQueued);
    assert_eq!(rig.advance(10), None);
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Empty));
    assert_eq!(rig.table.queued_status_count(CH), 2);
    assert_eq!(
        rig.drain(),
        vec![
            record(0, 0x408, StatusFlags::ENDS, 0),
            record(0, 0x508, StatusFlags::ENDS, 0),
        ]
    );
}

#[test]
fn test_data_chained_transfer_equals_single_transfer() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    rig.attach(1, loopback_with_latency(0));
    let data: Vec<u8> = (0..=255).collect();
    rig.data(DATA, &data);
    let chained = rig.program(
        0x400,
        &[
            iocd(Command::WRITE, 0x1000, CommandFlags::DATA_CHAIN, 200),
            iocd(Command::WRITE, 0x10C8, CommandFlags::COMMAND_CHAIN, 56),
            iocd(Command::READ, 0x3000, no_flags(), 256),
        ],
    );
    let single = rig.program(
        0x500,
        &[
            iocd(Command::WRITE, 0x1000, CommandFlags::COMMAND_CHAIN, 256),
            iocd(Command::READ, 0x4000, no_flags(), 256),
        ],
    );

    assert_eq!(rig.start(0, chained), XioOutcome::AcceptedNoStatus);
    let chained_status = rig.drain();
    assert_eq!(rig.start(1, single), XioOutcome::AcceptedNoStatus);
    let single_status = rig.drain();

    assert_eq!(rig.dump(0x3000, 256), data);
    assert_eq!(rig.dump(0x4000, 256), data);
    assert_eq!(chained_status, vec![record(0, 0x418, StatusFlags::ENDS, 0)]);
    assert_eq!(single_status, vec![record(1, 0x510, StatusFlags::ENDS, 0)]);
}

#[test]
fn test_read_data_chain_splits_the_stream() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(30));
    rig.data(DATA, &[1, 2, 3, 4, 5, 6]);
    let list = rig.program(
        0x400,
        &[
            iocd(Command::WRITE, 0x1000, CommandFlags::COMMAND_CHAIN, 6),
            iocd(Command::READ, 0x2000, CommandFlags::DATA_CHAIN, 2),
            iocd(Command::READ, 0x2100, no_flags(), 4),
        ],
    );
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.advance(30), Some(Duration::from_micros(1060)));
    assert_eq!(rig.advance(30), None);
    assert_eq!(rig.dump(0x2000, 2), vec![1, 2]);
    assert_eq!(rig.dump(0x2100, 4), vec![3, 4, 5, 6]);
    assert_eq!(rig.drain(), vec![record(0, 0x418, StatusFlags::ENDS, 0)]);
}

#[test]
fn test_reset_channel_idles_every_unit() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(100));
    rig.attach(
        1,
        Box::new(Loopback::new(LoopbackConfiguration {
            latency: Duration::from_micros(100),
            queue_capacity: Some(2),
            require_inch: false,
        })),
    );
    rig.attach(2, loopback_with_latency(100));
    let list = rig.program(0x400, &[iocd(Command::WRITE, 0x1000, no_flags(), 8)]);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.start(1, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.start(1, list), XioOutcome::AcceptedQueued);
    assert_eq!(rig.start(2, list), XioOutcome::AcceptedNoStatus);
    assert!(rig
        .table
        .push_status_front(CH, record(2, 0x408, StatusFlags::ENDS, 0))
        .is_ok());
    assert!(rig.table.request_level(LEVEL).is_ok());

    assert_eq!(rig.xio(XioOp::ResetChannel, 0), XioOutcome::AcceptedNoStatus);
    for sub in 0..3 {
        assert_eq!(rig.table.transfer_state(unit(sub)), Some(TransferState::Empty));
        assert!(!rig.table.has_completion(unit(sub)));
    }
    assert_eq!(rig.table.pending_start_count(unit(1)), 0);
    assert_eq!(rig.table.queued_status_count(CH), 0);
    assert_eq!(rig.table.level_state(LEVEL), Some(LevelState::Idle));
    assert_eq!(rig.xio(XioOp::TestIo, 0), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.advance(500), None);
    assert_eq!(rig.table.queued_status_count(CH), 0);
}

#[test]
fn test_reset_controller_affects_one_unit() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(100));
    rig.attach(1, loopback_with_latency(100));
    let list = rig.program(0x400, &[iocd(Command::WRITE, 0x1000, no_flags(), 8)]);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.start(1, list), XioOutcome::AcceptedNoStatus);
    assert!(rig
        .table
        .push_status_front(CH, record(0, 0x999, StatusFlags::ENDS, 0))
        .is_ok());
    assert!(rig
        .table
        .push_status_front(CH, record(1, 0x888, StatusFlags::ENDS, 0))
        .is_ok());

    assert_eq!(rig.xio(XioOp::ResetController, 0), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Empty));
    assert_eq!(rig.table.transfer_state(unit(1)), Some(TransferState::Busy));
    assert!(rig.table.has_completion(unit(1)));
    assert_eq!(rig.table.queued_status_count(CH), 1);
    assert_eq!(rig.table.level_state(LEVEL), Some(LevelState::Requested));
    assert_eq!(rig.drain(), vec![record(1, 0x888, StatusFlags::ENDS, 0)]);
}

#[test]
fn test_arbitration_grants_highest_enabled_level_once() {
    let mut rig = Rig::new(4);
    for (level, icb) in [(5, 0x500), (3, 0x300), (7, 0x700)] {
        assert!(rig
            .table
            .add_simple_level(InterruptLevel(level), a(icb))
            .is_ok());
    }
    assert!(rig.table.enable_level(InterruptLevel(5)).is_ok());
    assert!(rig.table.enable_level(InterruptLevel(7)).is_ok());
    assert!(rig.table.request_level(InterruptLevel(5)).is_ok());
    assert!(rig.table.request_level(InterruptLevel(3)).is_ok());

    let granted = rig.table.scan_levels(&mut rig.mem);
    assert_eq!(
        granted.map(|ctx| (ctx.level, ctx.icb, ctx.owner, ctx.posted)),
        Some((InterruptLevel(5), a(0x500), LevelOwner::Simple, None))
    );
    assert_eq!(rig.table.scan_levels(&mut rig.mem), None);
    assert_eq!(rig.table.deactivate_level(InterruptLevel(5)), Ok(()));
    assert_eq!(rig.table.scan_levels(&mut rig.mem), None);
    assert_eq!(
        rig.table.level_state(InterruptLevel(3)),
        Some(LevelState::Requested)
    );
    assert_eq!(rig.table.level_state(InterruptLevel(7)), Some(LevelState::Idle));
}

#[test]
fn test_channel_level_stays_requested_while_status_is_queued() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    let list = rig.program(
        0x400,
        &[
            iocd(
                Command::NOP,
                0,
                CommandFlags::COMMAND_CHAIN | CommandFlags::PCI,
                0,
            ),
            iocd(Command::NOP, 0, no_flags(), 0),
        ],
    );
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.table.queued_status_count(CH), 2);

    rig.table.set_interrupts_blocked(true);
    assert!(rig.table.interrupts_blocked());
    assert_eq!(rig.table.scan_levels(&mut rig.mem), None);
    rig.table.set_interrupts_blocked(false);

    let first = rig.table.scan_levels(&mut rig.mem);
    assert_eq!(
        first.and_then(|ctx| ctx.posted),
        Some(record(0, 0x408, StatusFlags::PCI, 0))
    );
    assert_eq!(rig.table.level_state(LEVEL), Some(LevelState::Active));
    assert_eq!(rig.table.deactivate_level(LEVEL), Ok(()));
    assert_eq!(rig.table.level_state(LEVEL), Some(LevelState::Requested));

    let second = rig.table.scan_levels(&mut rig.mem);
    assert_eq!(
        second.and_then(|ctx| ctx.posted),
        Some(record(0, 0x410, StatusFlags::ENDS, 0))
    );
    assert_eq!(rig.table.deactivate_level(LEVEL), Ok(()));
    assert_eq!(rig.table.level_state(LEVEL), Some(LevelState::Idle));
    assert_eq!(rig.status_words(1), [0x0000_0410, 0x000C_0000]);
}

#[test]
fn test_disabled_channel_level_is_not_granted() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    let list = rig.program(0x400, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    assert!(rig.table.disable_level(LEVEL).is_ok());
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.table.scan_levels(&mut rig.mem), None);
    assert_eq!(rig.table.queued_status_count(CH), 1);
}

#[test]
fn test_halt_on_idle_unit_stores_nothing() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    assert_eq!(rig.xio(XioOp::HaltIo, 0), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.table.queued_status_count(CH), 0);
    assert_eq!(rig.table.level_state(LEVEL), Some(LevelState::Idle));
}

#[test]
fn test_halt_on_busy_unit_posts_one_record() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(100));
    let list = rig.program(0x400, &[iocd(Command::WRITE, 0x1000, no_flags(), 8)]);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert!(rig.table.has_completion(unit(0)));

    assert_eq!(rig.xio(XioOp::HaltIo, 0), XioOutcome::StatusStored);
    assert!(!rig.table.has_completion(unit(0)));
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Empty));
    assert_eq!(rig.table.queued_status_count(CH), 0);
    // Channel end, device end and unit exception; all 8 bytes unsent.
    assert_eq!(rig.status_words(0), [0x0000_0408, 0x000D_0008]);
    assert_eq!(rig.advance(200), None);
    assert_eq!(rig.table.queued_status_count(CH), 0);
}

#[test]
fn test_halt_with_device_hook_leaves_record_for_interrupt() {
    let mut rig = Rig::new(4);
    rig.attach(
        0,
        Box::new(Scripted {
            halt_hook: Some(StatusFlags::STATUS_MODIFIER),
            ..Scripted::default()
        }),
    );
    let list = rig.program(0x400, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.xio(XioOp::HaltIo, 0), XioOutcome::AcceptedNoStatus);
    assert!(!rig.table.has_completion(unit(0)));
    assert_eq!(
        rig.drain(),
        vec![record(
            0,
            0x408,
            StatusFlags::ENDS | StatusFlags::UNIT_EXCEPTION | StatusFlags::STATUS_MODIFIER,
            0
        )]
    );
}

#[test]
fn test_halt_lets_queued_start_run() {
    let mut rig = Rig::new(4);
    rig.attach(
        0,
        Box::new(Loopback::new(LoopbackConfiguration {
            latency: Duration::from_micros(100),
            queue_capacity: Some(1),
            require_inch: false,
        })),
    );
    let write = rig.program(0x400, &[iocd(Command::WRITE, 0x1000, no_flags(), 8)]);
    let nop = rig.program(0x500, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    assert_eq!(rig.start(0, write), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.start(0, nop), XioOutcome::AcceptedQueued);
    assert_eq!(rig.xio(XioOp::HaltIo, 0), XioOutcome::StatusStored);
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Empty));
    assert_eq!(rig.drain(), vec![record(0, 0x508, StatusFlags::ENDS, 0)]);
}

#[test]
fn test_stop_makes_current_command_the_last() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(100));
    rig.data(DATA, &[1, 2, 3, 4, 5, 6, 7, 8]);
    let list = rig.program(
        0x400,
        &[
            iocd(Command::WRITE, 0x1000, CommandFlags::COMMAND_CHAIN, 8),
            iocd(Command::READ, 0x2000, no_flags(), 8),
        ],
    );
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.xio(XioOp::StopIo, 0), XioOutcome::AcceptedNoStatus);
    assert!(rig.table.has_completion(unit(0)));
    assert_eq!(rig.advance(100), None);
    assert_eq!(rig.dump(0x2000, 8), vec![0; 8]);
    assert_eq!(rig.drain(), vec![record(0, 0x408, StatusFlags::ENDS, 0)]);
}

#[test]
fn test_stop_hook_ends_command_at_once() {
    let mut rig = Rig::new(4);
    rig.attach(
        0,
        Box::new(Scripted {
            stop_hook: Some(StatusFlags::ENDS),
            ..Scripted::default()
        }),
    );
    let list = rig.program(
        0x400,
        &[
            iocd(Command::NOP, 0, CommandFlags::COMMAND_CHAIN, 0),
            iocd(Command::NOP, 0, no_flags(), 0),
        ],
    );
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert!(rig
        .table
        .push_status_front(CH, record(3, 0x999, StatusFlags::ENDS, 0))
        .is_ok());
    assert_eq!(rig.xio(XioOp::StopIo, 0), XioOutcome::AcceptedNoStatus);
    assert!(!rig.table.has_completion(unit(0)));
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Empty));
    assert_eq!(
        rig.drain(),
        vec![
            record(3, 0x999, StatusFlags::ENDS, 0),
            record(0, 0x408, StatusFlags::ENDS, 0),
        ]
    );
}

#[test]
fn test_program_checks() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    let pchk = StatusFlags::ENDS | StatusFlags::PROGRAM_CHECK;

    let tic_first = rig.program(0x400, &[iocd(Command::TIC, 0x500, no_flags(), 0)]);
    rig.program(0x600, &[iocd(Command::NOP, 0, CommandFlags::COMMAND_CHAIN, 0)]);
    rig.program(0x608, &[iocd(Command::TIC, 0x700, no_flags(), 0)]);
    rig.program(0x700, &[iocd(Command::TIC, 0x800, no_flags(), 0)]);
    let reserved = a(0xB00);
    rig.program(0xB00, &[Iocd::from_words(0x0300_0000, 0x0001_0000)]);
    let data_chained_nop = rig.program(0xC00, &[iocd(Command::NOP, 0, CommandFlags::DATA_CHAIN, 0)]);
    let invalid = rig.program(0xD00, &[iocd(Command(0x10), 0, no_flags(), 0)]);

    let cases = [
        (tic_first, 0x408),
        (a(0x600), 0x708),
        (reserved, 0xB08),
        (data_chained_nop, 0xC08),
        (invalid, 0xD08),
        (a(0x404), 0x404),
        (a(0x20000), 0x20000),
    ];
    for (list, ending) in cases {
        assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
        assert_eq!(
            rig.drain(),
            vec![record(0, ending, pchk, 0)],
            "list at {list}"
        );
        assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Empty));
    }
}

#[test]
fn test_transfer_in_channel() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    let list = rig.program(
        0x900,
        &[
            iocd(Command::NOP, 0, CommandFlags::COMMAND_CHAIN, 0),
            iocd(Command::TIC, 0xA00, no_flags(), 0),
        ],
    );
    rig.program(0xA00, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.drain(), vec![record(0, 0xA08, StatusFlags::ENDS, 0)]);
}

#[test]
fn test_incorrect_length() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    let short = rig.program(
        0x400,
        &[
            iocd(Command::READ, 0x2000, CommandFlags::COMMAND_CHAIN, 16),
            iocd(Command::NOP, 0, no_flags(), 0),
        ],
    );
    let suppressed = rig.program(
        0x500,
        &[
            iocd(
                Command::READ,
                0x2000,
                CommandFlags::COMMAND_CHAIN | CommandFlags::SUPPRESS_LENGTH,
                16,
            ),
            iocd(Command::NOP, 0, no_flags(), 0),
        ],
    );
    assert_eq!(rig.start(0, short), XioOutcome::AcceptedNoStatus);
    assert_eq!(
        rig.drain(),
        vec![record(
            0,
            0x408,
            StatusFlags::ENDS | StatusFlags::INCORRECT_LENGTH,
            16
        )]
    );
    assert_eq!(rig.start(0, suppressed), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.drain(), vec![record(0, 0x510, StatusFlags::ENDS, 0)]);
}

#[test]
fn test_read_backward_skip_and_sense() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    rig.data(DATA, &[1, 2, 3, 4]);
    rig.data(a(0x2100), &[0xEE; 4]);
    let list = rig.program(
        0x400,
        &[
            iocd(Command::WRITE, 0x1000, CommandFlags::COMMAND_CHAIN, 4),
            iocd(Command::READ_BACKWARD, 0x2003, CommandFlags::COMMAND_CHAIN, 4),
            iocd(Command::WRITE, 0x1000, CommandFlags::COMMAND_CHAIN, 4),
            iocd(
                Command::READ,
                0x2100,
                CommandFlags::COMMAND_CHAIN | CommandFlags::SKIP,
                4,
            ),
            iocd(Command::SENSE, 0x2200, no_flags(), 1),
        ],
    );
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.dump(0x2000, 4), vec![4, 3, 2, 1]);
    assert_eq!(rig.dump(0x2100, 4), vec![0xEE; 4]);
    assert_eq!(rig.dump(0x2200, 1), vec![0]);
    assert_eq!(rig.drain(), vec![record(0, 0x428, StatusFlags::ENDS, 0)]);
}

#[test]
fn test_unit_check_aborts_the_chain() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    let list = rig.program(
        0x400,
        &[
            iocd(Command(0x0B), 0, CommandFlags::COMMAND_CHAIN, 0),
            iocd(Command::NOP, 0, no_flags(), 0),
        ],
    );
    let sense = rig.program(0x500, &[iocd(Command::SENSE, 0x2000, no_flags(), 1)]);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(
        rig.drain(),
        vec![record(
            0,
            0x408,
            StatusFlags::ENDS | StatusFlags::UNIT_CHECK,
            0
        )]
    );
    assert_eq!(rig.start(0, sense), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.dump(0x2000, 1), vec![SENSE_COMMAND_REJECT]);
}

#[test]
fn test_channel_end_then_device_end() {
    let mut rig = Rig::new(4);
    rig.attach(
        0,
        Box::new(Scripted {
            start_status: StatusFlags::CHANNEL_END,
            ..Scripted::default()
        }),
    );
    let list = rig.program(0x400, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(
        rig.table.transfer_state(unit(0)),
        Some(TransferState::ChannelEndPending)
    );
    assert_eq!(rig.xio(XioOp::GrabIo, 0), XioOutcome::Busy);
    assert_eq!(rig.table.queued_status_count(CH), 0);
    let outcome = rig
        .table
        .signal_channel_end(&rig.ctx, &mut rig.mem, unit(0), StatusFlags::DEVICE_END);
    assert_eq!(outcome, Ok(ProgramOutcome::Completed));
    assert_eq!(rig.drain(), vec![record(0, 0x408, StatusFlags::ENDS, 0)]);
}

#[test]
fn test_grab() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(100));
    rig.attach(
        1,
        Box::new(Scripted {
            walker: Some(ProgramOutcome::Running),
            ..Scripted::default()
        }),
    );
    let list = rig.program(0x400, &[iocd(Command::WRITE, 0x1000, no_flags(), 1)]);
    assert_eq!(rig.xio(XioOp::GrabIo, 0), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.xio(XioOp::GrabIo, 0), XioOutcome::Busy);

    assert_eq!(rig.start(1, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(
        rig.table.transfer_state(unit(1)),
        Some(TransferState::AwaitingNext)
    );
    assert_eq!(rig.xio(XioOp::GrabIo, 1), XioOutcome::BusySubchannel);

    assert_eq!(rig.advance(100), None);
    assert_eq!(rig.xio(XioOp::GrabIo, 0), XioOutcome::StatusStored);
}

#[test]
fn test_device_list_walker() {
    let mut rig = Rig::new(4);
    rig.attach(
        0,
        Box::new(Scripted {
            walker: Some(ProgramOutcome::Completed),
            walk: 2,
            ..Scripted::default()
        }),
    );
    let list = rig.program(
        0x400,
        &[
            iocd(Command::NOP, 0, CommandFlags::COMMAND_CHAIN, 0),
            iocd(Command::NOP, 0, no_flags(), 0),
        ],
    );
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.drain(), vec![record(0, 0x410, StatusFlags::ENDS, 0)]);

    let bad = rig.program(0x500, &[iocd(Command::TIC, 0x600, no_flags(), 0)]);
    assert_eq!(rig.start(0, bad), XioOutcome::AcceptedNoStatus);
    assert_eq!(
        rig.drain(),
        vec![record(
            0,
            0x508,
            StatusFlags::ENDS | StatusFlags::PROGRAM_CHECK,
            0
        )]
    );
}

#[test]
fn test_inch_required_before_other_commands() {
    let mut rig = Rig::new(4);
    rig.attach(
        0,
        Box::new(Loopback::new(LoopbackConfiguration {
            require_inch: true,
            ..LoopbackConfiguration::default()
        })),
    );
    let nop = rig.program(0x400, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    let init = rig.program(
        0x500,
        &[
            iocd(Command::INCH, 0x300, CommandFlags::COMMAND_CHAIN, 16),
            iocd(Command::NOP, 0, no_flags(), 0),
        ],
    );
    assert_eq!(rig.start(0, nop), XioOutcome::AcceptedNoStatus);
    assert_eq!(
        rig.drain(),
        vec![record(
            0,
            0x408,
            StatusFlags::ENDS | StatusFlags::PROGRAM_CHECK,
            0
        )]
    );

    assert_eq!(rig.start(0, init), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.table.status_buffer_next(CH), Some(a(0x300)));
    assert_eq!(rig.drain(), vec![record(0, 0x510, StatusFlags::ENDS, 0)]);
    assert_eq!(rig.table.status_buffer_next(CH), Some(a(0x308)));
    assert_eq!(rig.mem.fetch_word(a(0x300)), Ok(0x0000_0510));

    assert_eq!(rig.start(0, nop), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.drain(), vec![record(0, 0x408, StatusFlags::ENDS, 0)]);
}

#[test]
fn test_bad_inch_buffer_is_a_program_check() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    let list = rig.program(0x400, &[iocd(Command::INCH, 0x301, no_flags(), 16)]);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.table.status_buffer_next(CH), Some(STATUS_BUFFER));
    assert_eq!(
        rig.drain(),
        vec![record(
            0,
            0x408,
            StatusFlags::ENDS | StatusFlags::PROGRAM_CHECK,
            16
        )]
    );
}

#[test]
fn test_status_without_buffer_stays_queued() {
    let mut rig = Rig::with_config(&ChannelConfiguration {
        fifo_capacity: 4,
        interrupt: None,
        status_buffer: None,
    });
    rig.attach(0, loopback_with_latency(0));
    let list = rig.program(0x400, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.xio(XioOp::TestIo, 0), XioOutcome::Busy);
    assert_eq!(rig.start(0, list), XioOutcome::Busy);
    assert_eq!(rig.table.queued_status_count(CH), 1);
    assert_eq!(rig.xio(XioOp::ResetController, 0), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.table.queued_status_count(CH), 0);
    assert_eq!(rig.xio(XioOp::TestIo, 0), XioOutcome::AcceptedNoStatus);
}

#[test]
fn test_absent_devices() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    let list = rig.program(0x400, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    let nowhere = XioAddress::new(0x30, 0);
    assert_eq!(
        rig.table.start_io(&rig.ctx, &mut rig.mem, nowhere, list),
        XioOutcome::DeviceAbsent
    );
    assert_eq!(rig.start(9, list), XioOutcome::DeviceAbsent);

    assert!(rig.table.set_unit_enabled(unit(0), false).is_ok());
    assert_eq!(rig.start(0, list), XioOutcome::DeviceAbsent);
    assert_eq!(rig.xio(XioOp::ResetChannel, 0), XioOutcome::DeviceAbsent);
    assert_eq!(rig.table.queued_status_count(CH), 0);
    assert!(rig.table.set_unit_enabled(unit(0), true).is_ok());

    assert!(rig
        .table
        .route(LogicalChannel(0x05), ChannelNumber(0x44))
        .is_err());
    assert!(rig.table.route(LogicalChannel(0x05), CH).is_ok());
    let routed = XioAddress::new(0x05, 0);
    assert_eq!(
        rig.table.start_io(&rig.ctx, &mut rig.mem, routed, list),
        XioOutcome::AcceptedNoStatus
    );
    assert_eq!(rig.table.queued_status_count(CH), 1);
}

#[test]
fn test_busy_device_and_unsupported_operation() {
    let mut rig = Rig::new(4);
    rig.attach(
        0,
        Box::new(Scripted {
            pre_check: Rc::new(Cell::new(Some(PreCheck::Busy))),
            ..Scripted::default()
        }),
    );
    rig.attach(
        1,
        Box::new(Scripted {
            unsupported: Some(XioOp::HaltIo),
            ..Scripted::default()
        }),
    );
    let list = rig.program(0x400, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    assert_eq!(rig.start(0, list), XioOutcome::Busy);
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Empty));
    assert_eq!(rig.xio(XioOp::HaltIo, 1), XioOutcome::Unsupported);
    assert_eq!(rig.xio(XioOp::TestIo, 1), XioOutcome::AcceptedNoStatus);
}

#[test]
fn test_configuration_errors() {
    let mut table = ChannelTable::new();
    let config = ChannelConfiguration {
        interrupt: Some((LEVEL, ICB)),
        ..ChannelConfiguration::default()
    };
    assert!(table.add_channel(CH, &config).is_ok());
    assert!(table.add_channel(CH, &config).is_err());
    assert!(table.add_channel(ChannelNumber(0x21), &config).is_err());
    assert!(table
        .add_channel(
            ChannelNumber(0x22),
            &ChannelConfiguration {
                fifo_capacity: 0,
                ..ChannelConfiguration::default()
            }
        )
        .is_err());
    assert!(table
        .add_channel(
            ChannelNumber(0x23),
            &ChannelConfiguration {
                status_buffer: Some((a(0x204), 64)),
                ..ChannelConfiguration::default()
            }
        )
        .is_err());
    assert!(table.attach(unit(0), loopback_with_latency(0)).is_ok());
    assert!(table.attach(unit(0), loopback_with_latency(0)).is_err());
    assert!(table
        .attach(UnitAddress::new(0x7F, 0), loopback_with_latency(0))
        .is_err());
    assert!(table
        .attach(
            unit(1),
            Box::new(Loopback::new(LoopbackConfiguration {
                queue_capacity: Some(0),
                ..LoopbackConfiguration::default()
            }))
        )
        .is_err());
    assert!(table.enable_level(InterruptLevel(0x55)).is_err());
}

#[test]
fn test_completion_for_idle_unit_is_ignored() {
    let mut rig = Rig::new(4);
    let scripted = Scripted::default();
    rig.attach(0, Box::new(scripted));
    let list = rig.program(0x400, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(
        rig.table
            .signal_channel_end(&rig.ctx, &mut rig.mem, unit(0), StatusFlags::ENDS),
        Ok(ProgramOutcome::Completed)
    );
    assert_eq!(rig.table.queued_status_count(CH), 1);
    // The completion the device scheduled is still due, but the unit
    // is idle by then.
    assert!(rig.table.has_completion(unit(0)));
    assert_eq!(rig.advance(10), None);
    assert_eq!(rig.table.queued_status_count(CH), 1);
}

#[test]
fn test_queueable_busy_device_runs_start_when_ready() {
    let mut rig = Rig::new(4);
    let pre_check = Rc::new(Cell::new(Some(PreCheck::BusyQueueable)));
    rig.attach(
        0,
        Box::new(Scripted {
            pre_check: Rc::clone(&pre_check),
            queue: Some(2),
            start_status: StatusFlags::ENDS,
            ..Scripted::default()
        }),
    );
    rig.attach(
        1,
        Box::new(Scripted {
            pre_check: Rc::new(Cell::new(Some(PreCheck::BusyQueueable))),
            ..Scripted::default()
        }),
    );
    let list = rig.program(0x400, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedQueued);
    assert_eq!(rig.table.pending_start_count(unit(0)), 1);
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Empty));
    assert_eq!(rig.table.queued_status_count(CH), 0);

    // Still busy: the Start stays queued.
    assert_eq!(
        rig.table.device_ready(&rig.ctx, &mut rig.mem, unit(0)),
        Ok(None)
    );
    assert_eq!(rig.table.pending_start_count(unit(0)), 1);

    pre_check.set(None);
    assert_eq!(
        rig.table.device_ready(&rig.ctx, &mut rig.mem, unit(0)),
        Ok(Some(ProgramOutcome::Completed))
    );
    assert_eq!(rig.table.pending_start_count(unit(0)), 0);
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Empty));
    assert_eq!(rig.drain(), vec![record(0, 0x408, StatusFlags::ENDS, 0)]);
    assert_eq!(
        rig.table.device_ready(&rig.ctx, &mut rig.mem, unit(0)),
        Ok(None)
    );

    // Without a pending-start queue there is nowhere to hold it.
    assert_eq!(rig.start(1, list), XioOutcome::Busy);
    assert_eq!(rig.table.pending_start_count(unit(1)), 0);
}

#[test]
fn test_self_looping_list_yields_and_can_be_halted() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    let list = rig.program(
        0x400,
        &[
            iocd(Command::NOP, 0, CommandFlags::COMMAND_CHAIN, 0),
            iocd(Command::TIC, 0x400, no_flags(), 0),
        ],
    );
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(
        rig.table.transfer_state(unit(0)),
        Some(TransferState::AwaitingNext)
    );
    assert!(rig.table.has_completion(unit(0)));
    assert_eq!(rig.xio(XioOp::GrabIo, 0), XioOutcome::BusySubchannel);

    rig.advance(1);
    assert_eq!(
        rig.table.transfer_state(unit(0)),
        Some(TransferState::AwaitingNext)
    );
    assert!(rig.table.has_completion(unit(0)));

    assert_eq!(rig.xio(XioOp::HaltIo, 0), XioOutcome::StatusStored);
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Empty));
    assert!(!rig.table.has_completion(unit(0)));
    let [_, w2] = rig.status_words(0);
    assert_eq!(
        w2 >> 16,
        u32::from((StatusFlags::ENDS | StatusFlags::UNIT_EXCEPTION).bits())
    );
}

#[test]
fn test_long_command_chain_finishes_after_yielding() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    let mut list = vec![iocd(Command::NOP, 0, CommandFlags::COMMAND_CHAIN, 0); 99];
    list.push(iocd(Command::NOP, 0, no_flags(), 0));
    let list = rig.program(0x400, &list);
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(
        rig.table.transfer_state(unit(0)),
        Some(TransferState::AwaitingNext)
    );
    assert_eq!(rig.table.queued_status_count(CH), 0);

    assert_eq!(rig.advance(1), None);
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Empty));
    assert_eq!(rig.drain(), vec![record(0, 0x720, StatusFlags::ENDS, 0)]);
}

#[test]
fn test_stop_ends_a_yielding_chain() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    let list = rig.program(
        0x400,
        &[
            iocd(Command::NOP, 0, CommandFlags::COMMAND_CHAIN, 0),
            iocd(Command::TIC, 0x400, no_flags(), 0),
        ],
    );
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.xio(XioOp::StopIo, 0), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.advance(1), None);
    assert_eq!(rig.table.transfer_state(unit(0)), Some(TransferState::Empty));
    assert_eq!(rig.drain(), vec![record(0, 0x408, StatusFlags::ENDS, 0)]);
}

#[test]
fn test_halt_without_hook_posts_oldest_record_of_channel() {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(100));
    rig.attach(1, loopback_with_latency(0));
    let write = rig.program(0x400, &[iocd(Command::WRITE, 0x1000, no_flags(), 8)]);
    let nop = rig.program(0x500, &[iocd(Command::NOP, 0, no_flags(), 0)]);
    assert_eq!(rig.start(0, write), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.start(1, nop), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.table.queued_status_count(CH), 1);

    assert_eq!(rig.xio(XioOp::HaltIo, 0), XioOutcome::StatusStored);
    // Unit 1's record was older, so it is the one stored.
    assert_eq!(rig.status_words(0), [0x0100_0508, 0x000C_0000]);
    assert_eq!(
        rig.drain(),
        vec![record(
            0,
            0x408,
            StatusFlags::ENDS | StatusFlags::UNIT_EXCEPTION,
            8
        )]
    );
}

#[proptest]
fn data_chain_split_point_keeps_the_data(#[strategy(1_u16..256)] split: u16) {
    let mut rig = Rig::new(4);
    rig.attach(0, loopback_with_latency(0));
    let data: Vec<u8> = (0..=255).collect();
    rig.data(DATA, &data);
    let list = rig.program(
        0x400,
        &[
            iocd(Command::WRITE, 0x1000, CommandFlags::DATA_CHAIN, split),
            iocd(
                Command::WRITE,
                0x1000 + u32::from(split),
                CommandFlags::COMMAND_CHAIN,
                256 - split,
            ),
            iocd(Command::READ, 0x3000, no_flags(), 256),
        ],
    );
    assert_eq!(rig.start(0, list), XioOutcome::AcceptedNoStatus);
    assert_eq!(rig.dump(0x3000, 256), data);
    assert_eq!(rig.drain(), vec![record(0, 0x418, StatusFlags::ENDS, 0)]);
}
