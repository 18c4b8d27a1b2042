//! Repeatable sequence cursor shared by weaving (step 1 over picks) and
//! threading (step = thread group size over ends).
//!
//! A position is `(start, end, repeat_number)` where `start..=end` is the
//! current group of 1-based items within one repeat. `start == 0` is the
//! separator stop: the "all shafts down" position in front of a repeat. The
//! cursor begins on the stop in front of repeat 1.
//!
//! The separator stop between repeat `r` and `r + 1` belongs to repeat
//! `r + 1`, so `total = len * (repeat_number - 1) + start` holds everywhere
//! and never decreases while moving forward.

/// Sequences longer than this get a separator between repeats by default.
pub const NUM_ITEMS_FOR_REPEAT_SEPARATOR: u32 = 20;

pub fn default_separate_repeats(len: u32) -> bool {
    len > NUM_ITEMS_FOR_REPEAT_SEPARATOR
}

/// Split an absolute 1-based total into `(within, repeat_number)`.
///
/// `within` is in `1..=len` unless `total == 0`, which maps to `(0, 1)`.
/// An exact multiple `k * len` maps to `(len, k)` rather than `(0, k + 1)`
/// so a jump always lands on a real item. Returns `None` if the repeat
/// number does not fit.
pub fn split_total(total: u64, len: u32) -> Option<(u32, u32)> {
    assert!(len > 0, "split_total: sequence length must be positive");
    let len = u64::from(len);
    let mut repeat0 = total / len;
    let mut within = total % len;
    if within == 0 && total != 0 {
        within = len;
        repeat0 -= 1;
    }
    let repeat_number = u32::try_from(repeat0 + 1).ok()?;
    Some((within as u32, repeat_number))
}

pub fn join_total(within: u32, repeat_number: u32, len: u32) -> u64 {
    u64::from(len) * u64::from(repeat_number.saturating_sub(1)) + u64::from(within)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequencePosition {
    pub start: u32,
    pub end: u32,
    pub repeat_number: u32,
}

impl SequencePosition {
    pub const ORIGIN: SequencePosition = SequencePosition {
        start: 0,
        end: 0,
        repeat_number: 1,
    };

    pub fn is_separator(&self) -> bool {
        self.start == 0
    }
}

/// Two-phase jump: staged by the client, committed by the next pedal press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JumpState {
    #[default]
    Idle,
    Staged(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Moved,
    Jumped,
    /// Moving backward from the very first stop; nothing changed.
    AtStart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatCursor {
    len: u32,
    step: u32,
    pos: SequencePosition,
    forward: bool,
    separate_repeats: bool,
    jump: JumpState,
}

impl RepeatCursor {
    pub fn new(len: u32, step: u32, separate_repeats: bool) -> Self {
        assert!(step > 0, "RepeatCursor: step must be positive");
        Self {
            len,
            step,
            pos: SequencePosition::ORIGIN,
            forward: true,
            separate_repeats,
            jump: JumpState::Idle,
        }
    }

    /// Rebuild a cursor from persisted fields. Values that do not describe a
    /// valid position for `len` fall back to the origin.
    pub fn restore(
        len: u32,
        step: u32,
        start: u32,
        end: u32,
        repeat_number: u32,
        separate_repeats: bool,
    ) -> Self {
        let mut cursor = Self::new(len, step, separate_repeats);
        let valid = repeat_number >= 1
            && start <= len
            && if start == 0 {
                end == 0
            } else {
                end >= start && end <= len
            };
        if valid {
            cursor.pos = SequencePosition {
                start,
                end,
                repeat_number,
            };
        }
        cursor
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn position(&self) -> SequencePosition {
        self.pos
    }

    pub fn within(&self) -> u32 {
        self.pos.start
    }

    pub fn end(&self) -> u32 {
        self.pos.end
    }

    pub fn repeat_number(&self) -> u32 {
        self.pos.repeat_number
    }

    /// Absolute position of the start of the current group.
    pub fn total(&self) -> u64 {
        join_total(self.pos.start, self.pos.repeat_number, self.len)
    }

    /// Absolute position of the end of the current group.
    pub fn total_end(&self) -> u64 {
        join_total(self.pos.end, self.pos.repeat_number, self.len)
    }

    pub fn forward(&self) -> bool {
        self.forward
    }

    pub fn set_forward(&mut self, forward: bool) {
        self.forward = forward;
    }

    pub fn toggle_direction(&mut self) {
        self.forward = !self.forward;
    }

    pub fn separate_repeats(&self) -> bool {
        self.separate_repeats
    }

    pub fn set_separate_repeats(&mut self, separate: bool) {
        self.separate_repeats = separate;
    }

    /// Change the group size; the current group keeps its start.
    pub fn set_step(&mut self, step: u32) {
        assert!(step > 0, "RepeatCursor: step must be positive");
        self.step = step;
        if self.pos.start != 0 {
            self.pos.end = self.group_end(self.pos.start);
        }
    }

    pub fn jump(&self) -> JumpState {
        self.jump
    }

    pub fn staged_total(&self) -> Option<u64> {
        match self.jump {
            JumpState::Idle => None,
            JumpState::Staged(total) => Some(total),
        }
    }

    /// Where a committed jump would land, if one is staged.
    pub fn staged_position(&self) -> Option<SequencePosition> {
        let total = self.staged_total()?;
        self.position_for_total(total)
    }

    /// Stage a jump (or clear it with `None`). Re-staging supersedes.
    /// Returns false, leaving the jump untouched, if `total` is not
    /// reachable in this sequence.
    pub fn request_jump(&mut self, total: Option<u64>) -> bool {
        match total {
            None => {
                self.jump = JumpState::Idle;
                true
            }
            Some(total) => {
                if self.position_for_total(total).is_none() {
                    return false;
                }
                self.jump = JumpState::Staged(total);
                true
            }
        }
    }

    pub fn cancel_jump(&mut self) -> bool {
        let had_jump = self.jump != JumpState::Idle;
        self.jump = JumpState::Idle;
        had_jump
    }

    /// Move to the next stop in the current direction, or commit the staged
    /// jump. Call exactly once per "next" signal from the loom.
    ///
    /// # Panics
    ///
    /// If the sequence is empty.
    pub fn advance(&mut self) -> Advance {
        assert!(self.len > 0, "RepeatCursor::advance on an empty sequence");

        if let JumpState::Staged(total) = self.jump {
            self.jump = JumpState::Idle;
            if let Some(pos) = self.position_for_total(total) {
                self.pos = pos;
                return Advance::Jumped;
            }
        }

        let next = if self.forward {
            Some(self.next_forward())
        } else {
            self.next_backward()
        };
        match next {
            Some(pos) => {
                self.pos = pos;
                Advance::Moved
            }
            None => Advance::AtStart,
        }
    }

    fn group_end(&self, start: u32) -> u32 {
        start.saturating_add(self.step - 1).min(self.len)
    }

    fn position_for_total(&self, total: u64) -> Option<SequencePosition> {
        if self.len == 0 {
            return None;
        }
        let (start, repeat_number) = split_total(total, self.len)?;
        let end = if start == 0 { 0 } else { self.group_end(start) };
        Some(SequencePosition {
            start,
            end,
            repeat_number,
        })
    }

    fn next_forward(&self) -> SequencePosition {
        let SequencePosition {
            start,
            end,
            repeat_number,
        } = self.pos;
        if start == 0 {
            return SequencePosition {
                start: 1,
                end: self.group_end(1),
                repeat_number,
            };
        }
        if end < self.len {
            let next = end + 1;
            return SequencePosition {
                start: next,
                end: self.group_end(next),
                repeat_number,
            };
        }
        let repeat_number = repeat_number.saturating_add(1);
        if self.separate_repeats {
            SequencePosition {
                start: 0,
                end: 0,
                repeat_number,
            }
        } else {
            SequencePosition {
                start: 1,
                end: self.group_end(1),
                repeat_number,
            }
        }
    }

    fn next_backward(&self) -> Option<SequencePosition> {
        let SequencePosition {
            start,
            repeat_number,
            ..
        } = self.pos;
        if start == 0 && repeat_number <= 1 {
            return None;
        }
        if start == 1 && (self.separate_repeats || repeat_number == 1) {
            return Some(SequencePosition {
                start: 0,
                end: 0,
                repeat_number,
            });
        }
        if start <= 1 {
            // Last group of the previous repeat, aligned the way forward
            // motion groups it (so a short group sits at the end).
            let start = (self.len - 1) / self.step * self.step + 1;
            return Some(SequencePosition {
                start,
                end: self.len,
                repeat_number: repeat_number - 1,
            });
        }
        Some(SequencePosition {
            start: start.saturating_sub(self.step).max(1),
            end: start - 1,
            repeat_number,
        })
    }
}
