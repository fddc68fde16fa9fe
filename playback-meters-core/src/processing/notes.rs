//! Musical note naming for frequency readouts.

const NOTE_NAMES: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];

/// Lowest frequency that gets a note label.
pub const MIN_NOTE_FREQ: f32 = 20.0;

/// Fractional MIDI note number (A4 = 440 Hz = 69). Zero for non-positive input.
pub fn freq_to_midi(freq: f32) -> f32 {
    if freq <= 0.0 {
        return 0.0;
    }
    69.0 + 12.0 * (freq / 440.0).log2()
}

pub fn midi_to_freq(midi: f32) -> f32 {
    440.0 * 2.0f32.powf((midi - 69.0) / 12.0)
}

pub fn midi_to_note_name(midi: i32) -> &'static str {
    NOTE_NAMES[midi.rem_euclid(12) as usize]
}

pub fn midi_to_octave(midi: i32) -> i32 {
    midi.div_euclid(12) - 1
}

/// Deviation from the nearest equal-tempered note, in cents.
pub fn freq_to_cents(freq: f32) -> i32 {
    let midi = freq_to_midi(freq);
    ((midi - midi.round()) * 100.0).round() as i32
}

/// Formats a frequency as e.g. `"A4"`, `"A4 + 12 Cents"` or `"C#3 - 5 Cents"`.
/// Frequencies below 20 Hz yield an empty string.
pub fn freq_to_note_string(freq: f32) -> String {
    if freq < MIN_NOTE_FREQ {
        return String::new();
    }

    let midi = freq_to_midi(freq);
    let nearest = midi.round() as i32;
    let cents = ((midi - nearest as f32) * 100.0).round() as i32;
    let note = format!("{}{}", midi_to_note_name(nearest), midi_to_octave(nearest));

    match cents {
        0 => note,
        c if c > 0 => format!("{note} + {c} Cents"),
        c => format!("{note} - {} Cents", -c),
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    #[test]
    fn a4_is_midi_69() {
        assert_abs_diff_eq!(freq_to_midi(440.0), 69.0);
        assert_abs_diff_eq!(midi_to_freq(69.0), 440.0);
        assert_eq!(freq_to_midi(0.0), 0.0);
    }

    #[test]
    fn note_names_and_octaves() {
        assert_eq!(midi_to_note_name(60), "C");
        assert_eq!(midi_to_octave(60), 4);
        assert_eq!(midi_to_note_name(61), "C#");
        assert_eq!(midi_to_note_name(-1), "B");
        assert_eq!(midi_to_octave(-1), -2);
    }

    #[test]
    fn note_strings() {
        assert_eq!(freq_to_note_string(440.0), "A4");
        assert_eq!(freq_to_note_string(10.0), "");
        assert_eq!(freq_to_note_string(midi_to_freq(69.12)), "A4 + 12 Cents");
        assert_eq!(freq_to_note_string(midi_to_freq(47.95)), "C3 - 5 Cents");
    }

    #[test]
    fn cents_deviation() {
        assert_eq!(freq_to_cents(440.0), 0);
        assert_eq!(freq_to_cents(midi_to_freq(69.3)), 30);
    }
}
