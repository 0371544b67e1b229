use esp_hal::gpio::Input;

/// The two event buttons. Wired to ground with the internal pull-ups
/// enabled, so a pressed button reads low. Debouncing is the caller's
/// post-press delay.
pub struct Buttons {
    inputs: [Input<'static>; 2],
}

impl Buttons {
    pub fn new(button_1: Input<'static>, button_2: Input<'static>) -> Self {
        Self {
            inputs: [button_1, button_2],
        }
    }

    /// Level of the 1-based button; out-of-range reads as released.
    pub fn pressed(&self, index: usize) -> bool {
        match index {
            1 | 2 => self.inputs[index - 1].is_low(),
            _ => false,
        }
    }
}
