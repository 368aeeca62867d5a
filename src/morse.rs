use std::time::Duration;

use log::{info, trace, warn};

use crate::gpio::{LogicalPin, PinState};
use crate::manager::GpioCore;

const LETTER_GAP: &str = " ";
const WORD_GAP: &str = "  ";

const DOT_UNITS: u32 = 1;
const DASH_UNITS: u32 = 3;
const SYMBOL_GAP_UNITS: u32 = 1;
// on top of the gap after the last symbol
const LETTER_GAP_UNITS: u32 = 2;
const WORD_GAP_UNITS: u32 = 6;

#[derive(Debug, Clone, Copy)]
pub struct MorseTiming {
    pub unit: Duration,
}

impl Default for MorseTiming {
    fn default() -> Self {
        Self {
            unit: Duration::from_millis(300),
        }
    }
}

impl MorseTiming {
    async fn wait(&self, units: u32) {
        tokio::time::sleep(self.unit * units).await;
    }
}

fn code(character: char) -> Option<&'static str> {
    let code = match character.to_ascii_uppercase() {
        'A' => ".-",
        'B' => "-...",
        'C' => "-.-.",
        'D' => "-..",
        'E' => ".",
        'F' => "..-.",
        'G' => "--.",
        'H' => "....",
        'I' => "..",
        'J' => ".---",
        'K' => "-.-",
        'L' => ".-..",
        'M' => "--",
        'N' => "-.",
        'O' => "---",
        'P' => ".--.",
        'Q' => "--.-",
        'R' => ".-.",
        'S' => "...",
        'T' => "-",
        'U' => "..-",
        'V' => "...-",
        'W' => ".--",
        'X' => "-..-",
        'Y' => "-.--",
        'Z' => "--..",
        '0' => "-----",
        '1' => ".----",
        '2' => "..---",
        '3' => "...--",
        '4' => "....-",
        '5' => ".....",
        '6' => "-....",
        '7' => "--...",
        '8' => "---..",
        '9' => "----.",
        '.' => ".-.-.-",
        ',' => "--..--",
        ':' => "---...",
        '?' => "..--..",
        '\'' => ".----.",
        '-' => "-....-",
        '/' => "-..-.",
        '"' => ".-..-.",
        '=' => "-...-",
        '+' => ".-.-.",
        '@' => ".--.-.",
        _ => return None,
    };
    Some(code)
}

// letters are separated by one space, words by two
pub fn to_morse(text: &str) -> Option<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }

    let mut encoded = Vec::with_capacity(words.len());
    for word in words {
        let letters = word.chars().map(code).collect::<Option<Vec<_>>>()?;
        encoded.push(letters.join(LETTER_GAP));
    }
    Some(encoded.join(WORD_GAP))
}

pub fn is_valid_morse(morse: &str) -> bool {
    !morse.trim().is_empty() && morse.chars().all(|c| matches!(c, '.' | '-' | ' '))
}

// Some(morse) once the whole text has been keyed on the relay
pub async fn relay_morse_cycle(
    core: &GpioCore,
    text: &str,
    relay_pin: LogicalPin,
    timing: MorseTiming,
) -> Option<String> {
    if !core.is_allowed_to_execute() {
        warn!("Driver isn't started yet.");
        return None;
    }
    if text.trim().is_empty() {
        warn!("The specified text is empty.");
        return None;
    }
    if !core.config().pins.is_output(relay_pin) {
        warn!("Please specify a valid relay pin to run the cycle.");
        return None;
    }

    let Some(morse) = to_morse(text) else {
        warn!("Conversion to Morse failed. Cannot proceed.");
        return None;
    };
    trace!("TEXT >> {text}");
    trace!("MORSE >> {morse}");

    if !release(core, relay_pin) {
        return None;
    }

    let keyed = key(core, relay_pin, &morse, timing).await;
    // never leave the relay closed, even after a failed pulse
    let released = release(core, relay_pin);

    if keyed && released {
        info!("Morse cycle on pin {relay_pin} completed.");
        Some(morse)
    } else {
        warn!("Morse cycle on pin {relay_pin} failed.");
        None
    }
}

fn release(core: &GpioCore, pin: LogicalPin) -> bool {
    match core.pin_status(pin) {
        Some(status) if status.state == PinState::On => core.set_pin_state(pin, PinState::Off),
        _ => true,
    }
}

async fn key(core: &GpioCore, pin: LogicalPin, morse: &str, timing: MorseTiming) -> bool {
    for (w, word) in morse.split(WORD_GAP).enumerate() {
        if w > 0 {
            timing.wait(WORD_GAP_UNITS).await;
        }
        for (l, letter) in word.split(LETTER_GAP).enumerate() {
            if l > 0 {
                timing.wait(LETTER_GAP_UNITS).await;
            }
            for symbol in letter.chars() {
                let units = if symbol == '-' { DASH_UNITS } else { DOT_UNITS };
                if !core.set_pin_state(pin, PinState::On) {
                    return false;
                }
                timing.wait(units).await;
                if !core.set_pin_state(pin, PinState::Off) {
                    return false;
                }
                timing.wait(SYMBOL_GAP_UNITS).await;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn letters_and_words_are_spaced() {
        assert_eq!(to_morse("SOS").as_deref(), Some("... --- ..."));
        assert_eq!(to_morse("hi  there").as_deref(), Some(".... ..  - .... . .-. ."));
        assert_eq!(to_morse("E 7").as_deref(), Some(".  --..."));
    }

    #[test]
    fn unknown_or_empty_text_is_rejected() {
        assert!(to_morse("").is_none());
        assert!(to_morse("   ").is_none());
        assert!(to_morse("caf\u{e9}").is_none());
    }

    #[test]
    fn validity_only_allows_symbols_and_spaces() {
        assert!(is_valid_morse("... ---  ..."));
        assert!(!is_valid_morse("..x"));
        assert!(!is_valid_morse("  "));
    }
}
