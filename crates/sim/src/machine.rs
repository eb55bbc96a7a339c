//! The simulated machine: planner + stepper + board, sequenced by a
//! deterministic interrupt pump.
//!
//! The pump realizes the three priority levels of the real controller:
//!
//! * **HIGH** — each call to [`Machine::tick`] fires the DDA (or dwell)
//!   timer once; segment exhaustion runs the loader inline.
//! * **MEDIUM** — pending exec/load software interrupts drain after the
//!   tick, highest first.
//! * **LOW** — the planner callback and any client calls (`aline`,
//!   holds, flushes) run from the foreground between ticks.
//!
//! Virtual time advances by exactly one timer period per tick, so every
//! run is reproducible to the tick.

use motion::{
    Alarm, GcodeState, HoldState, MotionSnapshot, Planner, Reporter, Settings, Status, AXES,
};
use stepgen::{
    load_move, DdaEvent, LoadOutcome, MotorConfig, PrepOwner, PrepSlot, StepperRuntime,
    FREQUENCY_DDA, FREQUENCY_DWELL,
};
use tracing::{debug, warn};

use crate::board::SimBoard;

/// A reporter that forwards exception reports to `tracing` and keeps
/// counters for inspection.
#[derive(Debug, Default)]
pub struct TracingReporter {
    pub exceptions: Vec<Alarm>,
    pub status_requests: u64,
    pub last_buffers_available: usize,
}

impl Reporter for TracingReporter {
    fn exception(&mut self, alarm: Alarm) {
        warn!(%alarm, "exception report");
        self.exceptions.push(alarm);
    }

    fn request_status_report(&mut self) {
        self.status_requests += 1;
    }

    fn queue_report(&mut self, buffers_available: usize) {
        self.last_buffers_available = buffers_available;
    }
}

/// The composed pipeline under simulation.
pub struct Machine {
    pub planner: Planner,
    pub prep: PrepSlot,
    pub stepper: StepperRuntime,
    pub motors: MotorConfig,
    pub board: SimBoard,
    pub reporter: TracingReporter,
    exec_requested: bool,
    load_requested: bool,
    time_s: f64,
    ticks: u64,
    alarm: Option<Alarm>,
    /// Start/end times of the most recent dwell, in seconds.
    pub last_dwell: Option<(f64, f64)>,
    dwell_started_at: Option<f64>,
}

impl Machine {
    pub fn new(settings: Settings, motors: MotorConfig) -> Self {
        Self {
            planner: Planner::new(settings),
            prep: PrepSlot::new(),
            stepper: StepperRuntime::new(),
            motors,
            board: SimBoard::new(),
            reporter: TracingReporter::default(),
            exec_requested: false,
            load_requested: false,
            time_s: 0.0,
            ticks: 0,
            alarm: None,
            last_dwell: None,
            dwell_started_at: None,
        }
    }

    pub fn now_ms(&self) -> f64 {
        self.time_s * 1000.0
    }

    pub fn now_seconds(&self) -> f64 {
        self.time_s
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// The first alarm raised, if any. The machine freezes on alarm.
    pub fn alarm(&self) -> Option<Alarm> {
        self.alarm
    }

    /// Current position of one motor in its axis units.
    pub fn position_mm(&self, motor: usize) -> f64 {
        self.board.step_position[motor] as f64 / self.motors.steps_per_unit(motor)
    }

    pub fn snapshot(&self) -> MotionSnapshot {
        self.planner.snapshot()
    }

    /// Queue a feed move. Gating contract: callers must stop feeding
    /// while [`Planner::planner_is_full`] holds.
    pub fn feed_move(&mut self, target: [f64; AXES], feed_rate: f64) -> Result<Status, Alarm> {
        let gm = GcodeState::feed(target, feed_rate);
        self.aline(&gm)
    }

    /// Queue a rapid traverse.
    pub fn rapid_move(&mut self, target: [f64; AXES]) -> Result<Status, Alarm> {
        let gm = GcodeState::traverse(target);
        self.aline(&gm)
    }

    /// Queue a move from a full machine state.
    pub fn aline(&mut self, gm: &GcodeState) -> Result<Status, Alarm> {
        let result = self.planner.aline(gm, &mut self.reporter);
        if let Err(alarm) = result {
            self.freeze(alarm);
            return result;
        }
        self.foreground();
        result
    }

    /// Queue a dwell.
    pub fn dwell(&mut self, seconds: f64) -> Result<Status, Alarm> {
        let result = self.planner.dwell(seconds, &mut self.reporter);
        if let Err(alarm) = result {
            self.freeze(alarm);
            return result;
        }
        self.foreground();
        result
    }

    pub fn request_feedhold(&mut self) {
        self.planner.request_feedhold();
        self.kick_exec();
    }

    pub fn request_resume(&mut self) {
        if self.planner.request_resume() {
            self.exec_requested = true;
        }
        self.foreground();
    }

    pub fn request_queue_flush(&mut self) {
        self.planner.request_queue_flush(&self.motors);
    }

    /// One firing of the highest-priority timer, then the lower levels.
    pub fn tick(&mut self) {
        if self.alarm.is_some() {
            return;
        }
        self.ticks += 1;
        if self.stepper.dda_running() {
            self.time_s += 1.0 / FREQUENCY_DDA;
            self.board.now_seconds = self.time_s;
            if self.stepper.dda_tick(&mut self.board, &self.motors) == DdaEvent::SegmentDone {
                self.load_requested = false;
                self.do_load();
            }
        } else if self.stepper.dwell_running() {
            self.time_s += 1.0 / FREQUENCY_DWELL;
            self.board.now_seconds = self.time_s;
            if self.stepper.dwell_tick() == DdaEvent::SegmentDone {
                if let Some(start) = self.dwell_started_at.take() {
                    self.last_dwell = Some((start, self.time_s));
                }
                self.load_requested = false;
                self.do_load();
            }
        } else {
            // Idle: time still passes, which is what eventually fires
            // the new-block timeout.
            self.time_s += 1.0 / FREQUENCY_DDA;
            self.board.now_seconds = self.time_s;
        }
        self.drain_swis();
        self.foreground();
    }

    /// Run until the whole pipeline is quiet (or held), up to
    /// `max_ticks`. Returns true if it settled.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> bool {
        for _ in 0..max_ticks {
            if self.alarm.is_some() {
                return false;
            }
            if self.settled() {
                return true;
            }
            self.tick();
        }
        self.settled()
    }

    /// Run until the given motor has traveled at least `threshold` of
    /// its axis units. Returns true if reached.
    pub fn run_until_mm(&mut self, motor: usize, threshold: f64, max_ticks: u64) -> bool {
        for _ in 0..max_ticks {
            if self.position_mm(motor) >= threshold {
                return true;
            }
            if self.alarm.is_some() || self.settled() {
                return false;
            }
            self.tick();
        }
        false
    }

    /// Run until the machine is fully held.
    pub fn run_until_hold(&mut self, max_ticks: u64) -> bool {
        for _ in 0..max_ticks {
            if self.planner.hold_state() == HoldState::Hold && !self.stepper.is_busy() {
                return true;
            }
            if self.alarm.is_some() {
                return false;
            }
            self.tick();
        }
        false
    }

    fn settled(&self) -> bool {
        !self.stepper.is_busy()
            && !self.prep.armed()
            && !self.exec_requested
            && !self.load_requested
            && !self.planner.has_runnable_buffer()
            && !self.planner.runtime_active()
    }

    /// Foreground (lowest priority) work: planning and exec kicking.
    fn foreground(&mut self) {
        if self.alarm.is_some() {
            return;
        }
        let now = self.now_ms();
        if let Err(alarm) = self.planner.planner_callback(now, &mut self.reporter) {
            self.freeze(alarm);
            return;
        }
        self.kick_exec();
        self.drain_swis();
        // Runtime-idle is the power-down hook for in-cycle motors.
        if self.planner.motion_state() == motion::MotionState::Stop && !self.stepper.is_busy() {
            use stepgen::{PowerMode, StepPins};
            for m in 0..motion::MOTORS {
                if self.motors.motors[m].power_mode == PowerMode::PoweredInCycle {
                    self.board.write_enable(m, false);
                }
            }
        }
    }

    fn kick_exec(&mut self) {
        // Start (or restart) the exec chain when nothing downstream will
        // do it for us: steppers idle and no payload staged.
        if self.prep.owner() == PrepOwner::Exec && !self.prep.armed() && !self.stepper.is_busy() {
            self.exec_requested = true;
        }
    }

    /// Drain pending software interrupts, load before exec.
    fn drain_swis(&mut self) {
        for _ in 0..64 {
            if self.alarm.is_some() {
                return;
            }
            if self.load_requested && !self.stepper.is_busy() {
                self.load_requested = false;
                self.do_load();
                continue;
            }
            if self.exec_requested {
                self.exec_requested = false;
                self.do_exec();
                continue;
            }
            break;
        }
    }

    fn do_load(&mut self) {
        match load_move(
            &mut self.prep,
            &mut self.stepper,
            &mut self.board,
            &self.motors,
        ) {
            LoadOutcome::DwellStarted => {
                self.dwell_started_at = Some(self.time_s);
                self.exec_requested = true;
            }
            LoadOutcome::RunCommand(idx) => {
                if let Err(alarm) = self
                    .planner
                    .runtime_command(idx as usize, &mut self.reporter)
                {
                    self.freeze(alarm);
                    return;
                }
                self.exec_requested = true;
            }
            LoadOutcome::Started | LoadOutcome::NoWork | LoadOutcome::Null => {
                // In every case the next exec keeps the pipeline primed.
                self.exec_requested = true;
            }
        }
    }

    fn do_exec(&mut self) {
        if self.prep.owner() != PrepOwner::Exec {
            return;
        }
        loop {
            let stepper_idle = !self.stepper.is_busy();
            let result = self.planner.exec_move(
                &mut self.prep,
                &self.motors,
                Some(&mut self.board),
                stepper_idle,
                &mut self.reporter,
            );
            match result {
                Err(alarm) => {
                    self.freeze(alarm);
                    return;
                }
                Ok(status) => {
                    if self.prep.armed() {
                        self.prep.hand_to_loader();
                        self.load_requested = true;
                        break;
                    }
                    if status == Status::Eagain {
                        // Section bookkeeping call with nothing staged;
                        // run the continuation immediately.
                        continue;
                    }
                    break;
                }
            }
        }
        // Hold settling needs exec passes with no step activity to
        // shepherd DECEL_END -> PENDING -> HOLD.
        if !self.stepper.is_busy()
            && matches!(
                self.planner.hold_state(),
                HoldState::DecelEnd | HoldState::Pending
            )
        {
            self.exec_requested = true;
        }
    }

    fn freeze(&mut self, alarm: Alarm) {
        if self.alarm.is_none() {
            debug!(%alarm, "machine frozen by alarm");
            self.alarm = Some(alarm);
        }
        self.stepper.halt();
    }
}
