//! Line-based control surface
//!
//! One command per line, one command per mixer control:
//!
//! ```text
//! load a track.mp3      play a       stop b        pitch a -2
//! master 80             xfade 35     eq b low -6   reverb on 40
//! delay on 350 45 30    delay off    resume        suspend      quit
//! ```

use std::path::PathBuf;

use deckmix_audio::{DeckId, EqBand};
use thiserror::Error;

/// A parsed control line
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Load { deck: DeckId, path: PathBuf },
    Play(DeckId),
    Stop(DeckId),
    Pitch { deck: DeckId, semitones: f64 },
    Master(f32),
    Crossfade(f32),
    Eq { deck: DeckId, band: EqBand, gain_db: f32 },
    /// `mix` falls back to the stored value when omitted
    Reverb { enabled: bool, mix: Option<f32> },
    /// `settings` is (time ms, feedback %, mix %); stored values when omitted
    Delay {
        enabled: bool,
        settings: Option<(f32, f32, f32)>,
    },
    Resume,
    Suspend,
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("invalid {what} '{value}'")]
    Invalid { what: &'static str, value: String },
    #[error("unexpected argument '{0}'")]
    Trailing(String),
}

struct Args<'a> {
    words: std::str::SplitWhitespace<'a>,
}

impl<'a> Args<'a> {
    fn next(&mut self, what: &'static str) -> Result<&'a str, ParseError> {
        self.words.next().ok_or(ParseError::Missing(what))
    }

    fn deck(&mut self) -> Result<DeckId, ParseError> {
        let word = self.next("deck")?;
        match word.to_ascii_lowercase().as_str() {
            "a" => Ok(DeckId::A),
            "b" => Ok(DeckId::B),
            _ => Err(invalid("deck", word)),
        }
    }

    fn band(&mut self) -> Result<EqBand, ParseError> {
        let word = self.next("band")?;
        EqBand::ALL
            .into_iter()
            .find(|band| band.name().eq_ignore_ascii_case(word))
            .ok_or_else(|| invalid("band", word))
    }

    fn number<T: std::str::FromStr>(&mut self, what: &'static str) -> Result<T, ParseError> {
        let word = self.next(what)?;
        word.parse().map_err(|_| invalid(what, word))
    }

    fn switch(&mut self) -> Result<bool, ParseError> {
        let word = self.next("on/off")?;
        match word.to_ascii_lowercase().as_str() {
            "on" => Ok(true),
            "off" => Ok(false),
            _ => Err(invalid("on/off", word)),
        }
    }

    fn has_more(&self) -> bool {
        self.words.clone().next().is_some()
    }

    fn finish(mut self) -> Result<(), ParseError> {
        match self.words.next() {
            Some(extra) => Err(ParseError::Trailing(extra.to_string())),
            None => Ok(()),
        }
    }
}

fn invalid(what: &'static str, value: &str) -> ParseError {
    ParseError::Invalid {
        what,
        value: value.to_string(),
    }
}

/// Parse one control line
pub fn parse(line: &str) -> Result<Control, ParseError> {
    let line = line.trim();
    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    if name.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut args = Args {
        words: rest.split_whitespace(),
    };

    let control = match name.to_ascii_lowercase().as_str() {
        "load" => {
            let deck = args.deck()?;
            // The path is the rest of the line and may contain spaces
            let path = rest
                .split_once(char::is_whitespace)
                .map(|(_, path)| path.trim())
                .filter(|path| !path.is_empty())
                .ok_or(ParseError::Missing("path"))?;
            return Ok(Control::Load {
                deck,
                path: PathBuf::from(path),
            });
        }
        "play" => Control::Play(args.deck()?),
        "stop" => Control::Stop(args.deck()?),
        "pitch" => Control::Pitch {
            deck: args.deck()?,
            semitones: args.number("semitones")?,
        },
        "master" => Control::Master(args.number("volume")?),
        "xfade" | "crossfade" => Control::Crossfade(args.number("position")?),
        "eq" => Control::Eq {
            deck: args.deck()?,
            band: args.band()?,
            gain_db: args.number("gain")?,
        },
        "reverb" => {
            let enabled = args.switch()?;
            let mix = if args.has_more() {
                Some(args.number("mix")?)
            } else {
                None
            };
            Control::Reverb { enabled, mix }
        }
        "delay" => {
            let enabled = args.switch()?;
            let settings = if args.has_more() {
                Some((
                    args.number("time")?,
                    args.number("feedback")?,
                    args.number("mix")?,
                ))
            } else {
                None
            };
            Control::Delay { enabled, settings }
        }
        "resume" => Control::Resume,
        "suspend" => Control::Suspend,
        "quit" | "exit" => Control::Quit,
        other => return Err(ParseError::UnknownCommand(other.to_string())),
    };

    args.finish()?;
    Ok(control)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_commands() {
        assert_eq!(parse("play a"), Ok(Control::Play(DeckId::A)));
        assert_eq!(parse("  STOP B "), Ok(Control::Stop(DeckId::B)));
        assert_eq!(
            parse("pitch b -2.5"),
            Ok(Control::Pitch {
                deck: DeckId::B,
                semitones: -2.5
            })
        );
    }

    #[test]
    fn test_load_keeps_spaces_in_path() {
        assert_eq!(
            parse("load a My Music/side one.flac"),
            Ok(Control::Load {
                deck: DeckId::A,
                path: PathBuf::from("My Music/side one.flac"),
            })
        );
        assert_eq!(parse("load b"), Err(ParseError::Missing("path")));
    }

    #[test]
    fn test_eq_and_levels() {
        assert_eq!(
            parse("eq a mid -4"),
            Ok(Control::Eq {
                deck: DeckId::A,
                band: EqBand::Mid,
                gain_db: -4.0
            })
        );
        assert_eq!(parse("xfade 30"), Ok(Control::Crossfade(30.0)));
        assert_eq!(parse("master 75"), Ok(Control::Master(75.0)));
        assert!(matches!(
            parse("eq a bass 3"),
            Err(ParseError::Invalid { what: "band", .. })
        ));
    }

    #[test]
    fn test_effect_switches() {
        assert_eq!(
            parse("reverb on"),
            Ok(Control::Reverb {
                enabled: true,
                mix: None
            })
        );
        assert_eq!(
            parse("reverb off 20"),
            Ok(Control::Reverb {
                enabled: false,
                mix: Some(20.0)
            })
        );
        assert_eq!(
            parse("delay on 350 45 30"),
            Ok(Control::Delay {
                enabled: true,
                settings: Some((350.0, 45.0, 30.0))
            })
        );
        assert_eq!(parse("delay on 350"), Err(ParseError::Missing("feedback")));
    }

    #[test]
    fn test_errors() {
        assert_eq!(parse("   "), Err(ParseError::Empty));
        assert_eq!(
            parse("scratch a"),
            Err(ParseError::UnknownCommand("scratch".into()))
        );
        assert_eq!(parse("play a now"), Err(ParseError::Trailing("now".into())));
        assert!(matches!(
            parse("play c"),
            Err(ParseError::Invalid { what: "deck", .. })
        ));
    }
}
