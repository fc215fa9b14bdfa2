// Round counter with the configured loop ceiling.
pub struct LoopController {
    max_loop_count: u32,
    round: u32,
}

impl LoopController {
    pub fn new(max_loop_count: u32) -> Self {
        Self {
            max_loop_count,
            round: 0,
        }
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn advance(&mut self) {
        self.round += 1;
    }

    /// True once `max_loop_count` rounds have run.
    pub fn should_stop(&self) -> bool {
        self.round >= self.max_loop_count
    }
}
