//! The planner buffer ring.
//!
//! A fixed-size circular array of move buffers, doubly linked by index,
//! with three mobile cursors: `w` (writer — next EMPTY slot), `r`
//! (runtime — currently executing), and `p` (planner — next buffer for
//! the forward pass). Ownership of each cell moves monotonically through
//! the state machine below; every cross-stage read is preceded by a state
//! transition, which is the happens-before edge. No locks, no allocation.
//!
//! New blocks are populated by (1) reserving the write buffer,
//! (2) filling it in, (3) committing it. The run buffer is retrieved
//! repeatedly for long-running moves and returned to the pool by freeing
//! it, which is also how queue-empty is detected.

use crate::error::Alarm;
use crate::gcode::GcodeState;
use crate::{AXES, PLANNER_BUFFER_HEADROOM, PLANNER_BUFFER_POOL_SIZE};

/// Ownership states, in increasing order so `<` and `>` comparisons work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum BufferState {
    /// Available for use. Must be the zero value.
    #[default]
    Empty,
    /// Checked out and being populated by admission.
    Initializing,
    /// Velocity maxima set; planning in progress.
    InProcess,
    /// Committed and ready for final planning.
    Prepped,
    /// Fully planned. May still be replanned until it runs.
    Planned,
    /// The currently executing buffer.
    Running,
}

/// What kind of block the buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum MoveType {
    /// A no-op placeholder.
    #[default]
    Null,
    /// An acceleration-planned line.
    Aline,
    /// A timed pause.
    Dwell,
    /// A synchronous command executed in order with motion.
    Command,
}

/// Run-state of a block from the runtime's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub enum RunState {
    #[default]
    Off,
    /// Committed but not started, or reset for re-execution after a hold.
    New,
    Run,
}

/// Synchronous command callback: receives the value and flag vectors
/// frozen at queue time.
pub type CommandFn = fn(&[f64; AXES], &[bool; AXES]);

/// One planning unit: a single block's geometry, velocity envelope,
/// assigned kinematics, and ramp partition.
#[derive(Debug, Clone)]
pub struct MoveBuffer {
    pub state: BufferState,
    pub move_type: MoveType,
    pub run_state: RunState,

    /// Callback for command blocks.
    pub cm_func: Option<CommandFn>,
    pub value_vector: [f64; AXES],
    pub axis_flags: [bool; AXES],

    /// Unit direction vector of the move.
    pub unit: [f64; AXES],
    /// Total length in mm. Never modified after admission.
    pub length: f64,
    /// Real whole-block time in minutes, set by ramp generation.
    pub move_time: f64,
    /// Dwell duration in seconds for dwell blocks.
    pub dwell_seconds: f64,

    /// Back-planning gate: true until the block is optimally planned.
    pub replannable: bool,
    /// Forward-planning gate: committed blocks are plannable until the
    /// runtime locks them.
    pub plannable: bool,
    /// Hard lock used during hold re-shaping.
    pub locked: bool,

    // Velocity envelope (caps).
    pub entry_vmax: f64,
    pub cruise_vset: f64,
    pub cruise_vmax: f64,
    pub exit_vmax: f64,
    /// Velocity change achievable over this length at this jerk.
    pub delta_vmax: f64,
    pub junction_vmax: f64,
    /// Back-planning scratch: fastest feasible entry.
    pub braking_velocity: f64,

    // Assigned kinematics.
    pub entry_velocity: f64,
    pub cruise_velocity: f64,
    pub exit_velocity: f64,

    // Jerk terms, cached at admission.
    pub jerk: f64,
    pub recip_jerk: f64,
    pub cbrt_jerk: f64,

    // Ramp partition.
    pub head_length: f64,
    pub body_length: f64,
    pub tail_length: f64,
    pub head_time: f64,
    pub body_time: f64,
    pub tail_time: f64,

    /// Frozen machine state for the block.
    pub gm: GcodeState,

    /// Static ring links. Preserved across clears.
    pub nx: u8,
    pub pv: u8,
}

impl Default for MoveBuffer {
    fn default() -> Self {
        Self {
            state: BufferState::Empty,
            move_type: MoveType::Null,
            run_state: RunState::Off,
            cm_func: None,
            value_vector: [0.0; AXES],
            axis_flags: [false; AXES],
            unit: [0.0; AXES],
            length: 0.0,
            move_time: 0.0,
            dwell_seconds: 0.0,
            replannable: false,
            plannable: false,
            locked: false,
            entry_vmax: 0.0,
            cruise_vset: 0.0,
            cruise_vmax: 0.0,
            exit_vmax: 0.0,
            delta_vmax: 0.0,
            junction_vmax: 0.0,
            braking_velocity: 0.0,
            entry_velocity: 0.0,
            cruise_velocity: 0.0,
            exit_velocity: 0.0,
            jerk: 0.0,
            recip_jerk: 0.0,
            cbrt_jerk: 0.0,
            head_length: 0.0,
            body_length: 0.0,
            tail_length: 0.0,
            head_time: 0.0,
            body_time: 0.0,
            tail_time: 0.0,
            gm: GcodeState::default(),
            nx: 0,
            pv: 0,
        }
    }
}

impl MoveBuffer {
    /// Reset everything except the ring links.
    fn clear(&mut self) {
        let (nx, pv) = (self.nx, self.pv);
        *self = MoveBuffer::default();
        self.nx = nx;
        self.pv = pv;
    }
}

/// The ring itself.
#[derive(Debug)]
pub struct BufferRing {
    bufs: [MoveBuffer; PLANNER_BUFFER_POOL_SIZE],
    /// Writer cursor: the next EMPTY slot.
    pub w: usize,
    /// Runtime cursor: the currently executing buffer.
    pub r: usize,
    /// Planner cursor: the next buffer for the forward pass.
    pub p: usize,
    /// Running count of EMPTY buffers.
    pub buffers_available: usize,
}

impl BufferRing {
    pub fn new() -> Self {
        let mut bufs: [MoveBuffer; PLANNER_BUFFER_POOL_SIZE] =
            core::array::from_fn(|_| MoveBuffer::default());
        let n = PLANNER_BUFFER_POOL_SIZE;
        for (i, buf) in bufs.iter_mut().enumerate() {
            buf.nx = ((i + 1) % n) as u8;
            buf.pv = ((i + n - 1) % n) as u8;
        }
        Self {
            bufs,
            w: 0,
            r: 0,
            p: 0,
            buffers_available: n,
        }
    }

    pub fn buf(&self, idx: usize) -> &MoveBuffer {
        &self.bufs[idx]
    }

    pub fn buf_mut(&mut self, idx: usize) -> &mut MoveBuffer {
        &mut self.bufs[idx]
    }

    pub fn nx_of(&self, idx: usize) -> usize {
        self.bufs[idx].nx as usize
    }

    pub fn pv_of(&self, idx: usize) -> usize {
        self.bufs[idx].pv as usize
    }

    /// Reserve the next write buffer. `None` means the ring is full; the
    /// caller decides whether that is fatal.
    pub fn get_write_buffer(&mut self) -> Option<usize> {
        if self.bufs[self.w].state != BufferState::Empty {
            return None;
        }
        let idx = self.w;
        self.bufs[idx].clear();
        self.bufs[idx].state = BufferState::Initializing;
        self.buffers_available -= 1;
        Some(idx)
    }

    /// Place the populated write buffer in the queue and advance the
    /// writer cursor. The caller must not touch the buffer afterwards —
    /// it may be processed and freed before this function returns to it.
    pub fn commit_write_buffer(&mut self, move_type: MoveType) -> usize {
        let idx = self.w;
        let buf = &mut self.bufs[idx];
        buf.move_type = move_type;
        buf.run_state = RunState::New;
        buf.state = BufferState::Prepped;
        buf.plannable = true;
        self.w = buf.nx as usize;
        idx
    }

    /// The most recently committed buffer, if any.
    pub fn newest(&self) -> Option<usize> {
        let idx = self.pv_of(self.w);
        if self.bufs[idx].state == BufferState::Empty {
            None
        } else {
            Some(idx)
        }
    }

    /// The run buffer, or `None` when the queue is empty (not an error).
    pub fn get_run_buffer(&self) -> Option<usize> {
        if self.bufs[self.r].state == BufferState::Empty {
            None
        } else {
            Some(self.r)
        }
    }

    /// Release the run buffer back to the pool and advance the runtime
    /// cursor. Returns true if the queue is now empty, which is the hook
    /// for end-of-cycle processing.
    pub fn free_run_buffer(&mut self) -> bool {
        let idx = self.r;
        self.bufs[idx].clear();
        self.r = self.bufs[idx].nx as usize;
        self.buffers_available += 1;
        self.bufs[self.r].state == BufferState::Empty
    }

    /// True when fewer than the headroom reserve remains. Upstream must
    /// gate new input lines on this.
    pub fn is_full(&self) -> bool {
        self.buffers_available < PLANNER_BUFFER_HEADROOM
    }

    /// True when every buffer is EMPTY.
    pub fn is_empty(&self) -> bool {
        self.buffers_available == PLANNER_BUFFER_POOL_SIZE
    }

    /// True if the run buffer holds anything, i.e. motion has not
    /// drained.
    pub fn has_runnable(&self) -> bool {
        self.bufs[self.r].state != BufferState::Empty
    }

    /// Ring integrity check. Validates link structure, the available
    /// count, and that no buffer holds an illegal velocity assignment.
    pub fn assertions(&self) -> Result<(), Alarm> {
        let mut empties = 0;
        let mut idx = 0;
        for step in 0..PLANNER_BUFFER_POOL_SIZE {
            let buf = &self.bufs[idx];
            if self.bufs[buf.nx as usize].pv as usize != idx {
                return Err(Alarm::PlannerAssertion("ring links are inconsistent"));
            }
            if buf.state == BufferState::Empty {
                empties += 1;
            }
            if buf.state >= BufferState::Planned && buf.move_type == MoveType::Aline {
                if buf.entry_velocity < 0.0 || buf.cruise_velocity < 0.0 || buf.exit_velocity < 0.0
                {
                    return Err(Alarm::PlannerAssertion("negative planned velocity"));
                }
                if buf.cruise_velocity <= 0.0 {
                    return Err(Alarm::PlannerAssertion("zero cruise velocity at rest"));
                }
            }
            idx = buf.nx as usize;
            if step == PLANNER_BUFFER_POOL_SIZE - 1 && idx != 0 {
                return Err(Alarm::PlannerAssertion("ring does not close"));
            }
        }
        if empties != self.buffers_available {
            return Err(Alarm::PlannerAssertion("available count mismatch"));
        }
        Ok(())
    }
}

impl Default for BufferRing {
    fn default() -> Self {
        Self::new()
    }
}
