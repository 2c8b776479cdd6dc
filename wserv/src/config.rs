//! Screen configuration from `wsini.ini`.
//!
//! The ROM carries an INI file describing each screen and its display
//! modes: section `[SCREEN<n>]` with keys `SCR_WIDTH<m>`, `SCR_HEIGHT<m>`
//! and `SCR_ROTATION<m>` for modes m = 1..K. Keys may be separated from
//! their value by `=` or whitespace.

use log::warn;

use karst_base::Vec2;

/// One display mode of a screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenMode {
    /// 1-based mode number.
    pub mode_number: i32,
    /// Size in pixels.
    pub size: Vec2,
    /// Rotation in degrees: 0, 90, 180 or 270.
    pub rotation: i32,
}

/// One configured screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenConfig {
    /// 0-based screen number.
    pub screen_number: i32,
    /// Display modes, first is the boot mode.
    pub modes: Vec<ScreenMode>,
}

/// The fallback used when the ROM has no usable `wsini.ini`.
pub fn default_screens() -> Vec<ScreenConfig> {
    vec![ScreenConfig {
        screen_number: 0,
        modes: vec![ScreenMode {
            mode_number: 1,
            size: Vec2::new(176, 208),
            rotation: 0,
        }],
    }]
}

/// Parses `wsini.ini` text into the screen list.
///
/// Unknown sections and keys are ignored; a screen with no complete mode
/// is dropped. Returns an empty list for text with no `SCREEN` sections.
pub fn parse_wsini(text: &str) -> Vec<ScreenConfig> {
    let mut screens = Vec::new();

    let mut screen_number = 0;
    loop {
        let Some(section) = find_section(text, &format!("SCREEN{screen_number}")) else {
            break;
        };

        let mut modes = Vec::new();
        let mut mode = 1;
        loop {
            let Some(width) = lookup_int(section, &format!("SCR_WIDTH{mode}")) else {
                break;
            };
            let Some(height) = lookup_int(section, &format!("SCR_HEIGHT{mode}")) else {
                warn!("wsini: SCR_WIDTH{mode} without SCR_HEIGHT{mode}");
                break;
            };
            let rotation = lookup_int(section, &format!("SCR_ROTATION{mode}")).unwrap_or(0);
            if !matches!(rotation, 0 | 90 | 180 | 270) {
                warn!("wsini: ignoring bad rotation {rotation}");
            }
            modes.push(ScreenMode {
                mode_number: mode,
                size: Vec2::new(width, height),
                rotation: if matches!(rotation, 0 | 90 | 180 | 270) {
                    rotation
                } else {
                    0
                },
            });
            mode += 1;
        }

        if !modes.is_empty() {
            screens.push(ScreenConfig {
                screen_number,
                modes,
            });
        }
        screen_number += 1;
    }

    screens
}

/// Returns the body of a `[name]` section.
fn find_section<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let mut start = None;
    let mut offset = 0;
    for line in text.lines() {
        let trimmed = line.trim();
        if let Some(section) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            if let Some(begin) = start {
                return Some(&text[begin..offset]);
            }
            if section.eq_ignore_ascii_case(name) {
                start = Some(offset + line.len() + 1);
            }
        }
        offset += line.len() + 1;
    }
    start.map(|begin| &text[begin.min(text.len())..])
}

/// Looks up an integer key in a section body.
fn lookup_int(section: &str, key: &str) -> Option<i32> {
    for line in section.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        let (k, v) = match line.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => match line.split_once(char::is_whitespace) {
                Some((k, v)) => (k.trim(), v.trim()),
                None => continue,
            },
        };
        if k.eq_ignore_ascii_case(key) {
            return v.parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[SCREEN0]
SCR_WIDTH1 176
SCR_HEIGHT1 208
SCR_ROTATION1 0
SCR_WIDTH2 208
SCR_HEIGHT2 176
SCR_ROTATION2 90

[SCREEN1]
SCR_WIDTH1=320
SCR_HEIGHT1=240
";

    #[test]
    fn parses_screens_and_modes() {
        let screens = parse_wsini(SAMPLE);
        assert_eq!(screens.len(), 2);

        let s0 = &screens[0];
        assert_eq!(s0.screen_number, 0);
        assert_eq!(s0.modes.len(), 2);
        assert_eq!(s0.modes[0].size, Vec2::new(176, 208));
        assert_eq!(s0.modes[1].rotation, 90);

        let s1 = &screens[1];
        assert_eq!(s1.modes.len(), 1);
        assert_eq!(s1.modes[0].size, Vec2::new(320, 240));
        assert_eq!(s1.modes[0].rotation, 0);
    }

    #[test]
    fn missing_screens_yield_empty_list() {
        assert!(parse_wsini("[GENERAL]\nFOO 1\n").is_empty());
        assert!(parse_wsini("").is_empty());
    }

    #[test]
    fn mode_numbering_stops_at_first_gap() {
        let text = "[SCREEN0]\nSCR_WIDTH1 100\nSCR_HEIGHT1 100\nSCR_WIDTH3 300\nSCR_HEIGHT3 300\n";
        let screens = parse_wsini(text);
        assert_eq!(screens[0].modes.len(), 1);
    }

    #[test]
    fn bad_rotation_falls_back_to_zero() {
        let text = "[SCREEN0]\nSCR_WIDTH1 10\nSCR_HEIGHT1 10\nSCR_ROTATION1 45\n";
        let screens = parse_wsini(text);
        assert_eq!(screens[0].modes[0].rotation, 0);
    }
}
