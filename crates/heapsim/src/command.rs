use std::{num::ParseIntError, str::FromStr};

use block_heap::{ParseStrategyError, Strategy};
use snafu::{ResultExt as _, Snafu};
use snafu_utils::Location;

/// One step of a heapsim script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Alloc(usize),
    Free(usize),
    Find(usize),
    Strategy(Strategy),
    Defrag,
    Compact,
    State,
    Stats,
    Largest,
    Leaks,
}

#[derive(Debug, Snafu)]
pub(crate) enum ParseCommandError {
    #[snafu(display("unknown command `{command}`"))]
    Unknown {
        command: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("command `{command}` takes no argument"))]
    UnexpectedArgument {
        command: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("command `{command}` requires an argument"))]
    MissingArgument {
        command: String,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid number `{value}` for `{command}`: {source}"))]
    InvalidNumber {
        command: String,
        value: String,
        #[snafu(source)]
        source: ParseIntError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("{source}"))]
    InvalidStrategy {
        #[snafu(source)]
        source: ParseStrategyError,
        #[snafu(implicit)]
        location: Location,
    },
}

fn number(command: &str, value: &str) -> Result<usize, ParseCommandError> {
    value.parse().context(InvalidNumberSnafu { command, value })
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (command, arg) = match s.split_once(':') {
            Some((command, arg)) => (command, Some(arg)),
            None => (s, None),
        };
        let command = command.to_ascii_lowercase();

        let parsed = match (command.as_str(), arg) {
            ("alloc", Some(arg)) => Self::Alloc(number(&command, arg)?),
            ("free", Some(arg)) => Self::Free(number(&command, arg)?),
            ("find", Some(arg)) => Self::Find(number(&command, arg)?),
            ("strategy", Some(arg)) => {
                Self::Strategy(arg.parse().context(InvalidStrategySnafu)?)
            }
            ("defrag", None) => Self::Defrag,
            ("compact", None) => Self::Compact,
            ("state", None) => Self::State,
            ("stats", None) => Self::Stats,
            ("largest", None) => Self::Largest,
            ("leaks", None) => Self::Leaks,
            ("alloc" | "free" | "find" | "strategy", None) => {
                return MissingArgumentSnafu { command }.fail();
            }
            ("defrag" | "compact" | "state" | "stats" | "largest" | "leaks", Some(_)) => {
                return UnexpectedArgumentSnafu { command }.fail();
            }
            _ => return UnknownSnafu { command }.fail(),
        };
        Ok(parsed)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command() {
        let script = [
            ("alloc:3000", Command::Alloc(3000)),
            ("free:0", Command::Free(0)),
            ("FIND:2", Command::Find(2)),
            ("strategy:best", Command::Strategy(Strategy::BestFit)),
            ("strategy:buddy-fit", Command::Strategy(Strategy::BuddyFit)),
            ("defrag", Command::Defrag),
            ("compact", Command::Compact),
            ("state", Command::State),
            ("stats", Command::Stats),
            ("largest", Command::Largest),
            ("leaks", Command::Leaks),
        ];
        for (text, expected) in script {
            assert_eq!(text.parse::<Command>().unwrap(), expected, "{text}");
        }
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(matches!(
            "malloc:4".parse::<Command>(),
            Err(ParseCommandError::Unknown { .. })
        ));
        assert!(matches!(
            "alloc".parse::<Command>(),
            Err(ParseCommandError::MissingArgument { .. })
        ));
        assert!(matches!(
            "state:1".parse::<Command>(),
            Err(ParseCommandError::UnexpectedArgument { .. })
        ));
        assert!(matches!(
            "free:-1".parse::<Command>(),
            Err(ParseCommandError::InvalidNumber { .. })
        ));
        assert!(matches!(
            "strategy:worst".parse::<Command>(),
            Err(ParseCommandError::InvalidStrategy { .. })
        ));
    }
}
