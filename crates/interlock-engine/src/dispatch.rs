//! Line-oriented command dispatch.
//!
//! Each input line is `[timestamp] command (-flag value)*`. The reply
//! echoes the timestamp token, a space, then the command's output; for
//! multi-line outputs only the first line carries the prefix. Every
//! failure, whatever its kind, renders as a single `-1`; the variant
//! only reaches the debug log.

use interlock_common::{
    Date, EngineConfig, InterlockError, MailAddr, Password, RealName, Result, Station, Time,
    TrainName, Username,
};
use tracing::debug;

use crate::catalog::TrainInfo;
use crate::engine::{BuyOutcome, Engine};

/// One reply per input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A normal (possibly multi-line) response.
    Line(String),
    /// The farewell line; the caller should stop reading input.
    Exit(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Line(s) | Reply::Exit(s) => s,
        }
    }
}

enum Output {
    Text(String),
    Exit,
}

/// Single-letter flag arguments of one command.
struct ArgMap {
    values: [Option<String>; 26],
}

impl ArgMap {
    fn parse<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<Self> {
        let mut values: [Option<String>; 26] = Default::default();
        let mut tokens = tokens;
        while let Some(flag) = tokens.next() {
            let letter = match flag.as_bytes() {
                [b'-', c @ b'a'..=b'z'] => (*c - b'a') as usize,
                _ => return Err(InterlockError::invalid(format!("bad flag: {:?}", flag))),
            };
            let value = tokens
                .next()
                .ok_or_else(|| InterlockError::invalid(format!("flag {:?} has no value", flag)))?;
            values[letter] = Some(value.to_string());
        }
        Ok(Self { values })
    }

    fn opt(&self, flag: char) -> Option<&str> {
        self.values[(flag as u8 - b'a') as usize].as_deref()
    }

    fn get(&self, flag: char) -> Result<&str> {
        self.opt(flag)
            .ok_or_else(|| InterlockError::invalid(format!("missing flag -{}", flag)))
    }
}

fn parse_i32(s: &str) -> Result<i32> {
    s.parse()
        .map_err(|_| InterlockError::invalid(format!("bad integer: {:?}", s)))
}

/// Operation timestamp from the bracketed token; malformed input reads
/// as zero.
fn op_time_of(timestamp: &str) -> i32 {
    timestamp
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .unwrap_or(0)
}

/// Parses command lines and routes them into the engine.
pub struct Dispatcher {
    engine: Engine,
}

impl Dispatcher {
    pub fn open(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            engine: Engine::open(config)?,
        })
    }

    /// Handles one input line. Returns `None` for blank lines.
    pub fn handle(&mut self, line: &str) -> Option<Reply> {
        let mut tokens = line.split_whitespace();
        let timestamp = tokens.next()?;
        match self.execute(timestamp, tokens) {
            Ok(Output::Text(body)) => Some(Reply::Line(format!("{} {}", timestamp, body))),
            Ok(Output::Exit) => Some(Reply::Exit(format!("{} bye", timestamp))),
            Err(err) => {
                debug!(%timestamp, "command failed: {}", err);
                Some(Reply::Line(format!("{} -1", timestamp)))
            }
        }
    }

    fn execute<'a>(
        &mut self,
        timestamp: &str,
        mut tokens: impl Iterator<Item = &'a str>,
    ) -> Result<Output> {
        let command = tokens
            .next()
            .ok_or_else(|| InterlockError::invalid("empty command"))?;
        let args = ArgMap::parse(tokens)?;
        let body = match command {
            "add_user" => {
                self.engine.users.add_user(
                    &Username::parse(args.get('c')?)?,
                    &Username::parse(args.get('u')?)?,
                    Password::parse(args.get('p')?)?,
                    RealName::parse(args.get('n')?)?,
                    MailAddr::parse(args.get('m')?)?,
                    parse_i32(args.get('g')?)?,
                )?;
                "0".to_string()
            }
            "login" => {
                self.engine.users.login(
                    &Username::parse(args.get('u')?)?,
                    &Password::parse(args.get('p')?)?,
                )?;
                "0".to_string()
            }
            "logout" => {
                self.engine.users.logout(&Username::parse(args.get('u')?)?)?;
                "0".to_string()
            }
            "query_profile" => self
                .engine
                .users
                .query_profile(
                    &Username::parse(args.get('c')?)?,
                    &Username::parse(args.get('u')?)?,
                )?
                .to_string(),
            "modify_profile" => self
                .engine
                .users
                .modify_profile(
                    &Username::parse(args.get('c')?)?,
                    &Username::parse(args.get('u')?)?,
                    args.opt('p').map(Password::parse).transpose()?,
                    args.opt('n').map(RealName::parse).transpose()?,
                    args.opt('m').map(MailAddr::parse).transpose()?,
                    args.opt('g').map(parse_i32).transpose()?,
                )?
                .to_string(),
            "add_train" => {
                let info = TrainInfo::assemble(
                    parse_i32(args.get('n')?)? as usize,
                    parse_i32(args.get('m')?)?,
                    args.get('s')?,
                    args.get('p')?,
                    Time::parse(args.get('x')?)?,
                    args.get('t')?,
                    args.get('o')?,
                    args.get('d')?,
                    *args
                        .get('y')?
                        .as_bytes()
                        .first()
                        .ok_or_else(|| InterlockError::invalid("empty train type"))?,
                )?;
                self.engine
                    .catalog
                    .add_train(&TrainName::parse(args.get('i')?)?, info)?;
                "0".to_string()
            }
            "delete_train" => {
                self.engine
                    .catalog
                    .delete_train(&TrainName::parse(args.get('i')?)?)?;
                "0".to_string()
            }
            "release_train" => {
                self.engine
                    .catalog
                    .release_train(&TrainName::parse(args.get('i')?)?)?;
                "0".to_string()
            }
            "query_train" => self
                .engine
                .catalog
                .query_train(
                    &TrainName::parse(args.get('i')?)?,
                    Date::parse(args.get('d')?)?,
                )?
                .to_string(),
            "query_ticket" => {
                let tickets = self.engine.catalog.query_ticket(
                    &Station::parse(args.get('s')?)?,
                    &Station::parse(args.get('t')?)?,
                    Date::parse(args.get('d')?)?,
                    args.opt('p') == Some("cost"),
                )?;
                let mut body = tickets.len().to_string();
                for ticket in &tickets {
                    body.push_str(&format!("\n{}", ticket));
                }
                body
            }
            "query_transfer" => {
                let transfer = self.engine.catalog.query_transfer(
                    &Station::parse(args.get('s')?)?,
                    &Station::parse(args.get('t')?)?,
                    Date::parse(args.get('d')?)?,
                    args.opt('p') == Some("cost"),
                )?;
                match transfer {
                    Some(t) => format!("{}\n{}", t.first, t.second),
                    None => "0".to_string(),
                }
            }
            "buy_ticket" => {
                let outcome = self.engine.buy_ticket(
                    &Username::parse(args.get('u')?)?,
                    &TrainName::parse(args.get('i')?)?,
                    Date::parse(args.get('d')?)?,
                    parse_i32(args.get('n')?)?,
                    &Station::parse(args.get('f')?)?,
                    &Station::parse(args.get('t')?)?,
                    args.opt('q') == Some("true"),
                    op_time_of(timestamp),
                )?;
                match outcome {
                    BuyOutcome::Booked(price) => price.to_string(),
                    BuyOutcome::Queued => "queue".to_string(),
                }
            }
            "query_order" => {
                let orders = self.engine.query_order(&Username::parse(args.get('u')?)?)?;
                let mut body = orders.len().to_string();
                for order in &orders {
                    body.push_str(&format!("\n{}", order));
                }
                body
            }
            "refund_ticket" => {
                let k = args.opt('n').map(parse_i32).transpose()?.unwrap_or(1).max(1);
                self.engine
                    .refund_ticket(&Username::parse(args.get('u')?)?, k)?;
                "0".to_string()
            }
            "clean" => {
                self.engine.clean()?;
                "0".to_string()
            }
            "exit" => return Ok(Output::Exit),
            _ => {
                return Err(InterlockError::invalid(format!(
                    "unknown command: {:?}",
                    command
                )))
            }
        };
        Ok(Output::Text(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_dispatcher(dir: &tempfile::TempDir) -> Dispatcher {
        Dispatcher::open(&EngineConfig::at(dir.path())).unwrap()
    }

    fn run(d: &mut Dispatcher, line: &str) -> String {
        d.handle(line).unwrap().text().to_string()
    }

    #[test]
    fn test_blank_line_is_ignored() {
        let dir = tempdir().unwrap();
        let mut d = open_dispatcher(&dir);
        assert_eq!(d.handle(""), None);
        assert_eq!(d.handle("   "), None);
    }

    #[test]
    fn test_timestamp_echo_and_error() {
        let dir = tempdir().unwrap();
        let mut d = open_dispatcher(&dir);
        // Unknown command fails with -1 after the echoed token.
        assert_eq!(run(&mut d, "[17] frobnicate"), "[17] -1");
        // Login before any user exists fails.
        assert_eq!(run(&mut d, "[18] login -u who -p pw"), "[18] -1");
    }

    #[test]
    fn test_first_add_user() {
        let dir = tempdir().unwrap();
        let mut d = open_dispatcher(&dir);
        assert_eq!(
            run(
                &mut d,
                "[1] add_user -c whoever -u root -p pw -n Root -m r@x.com -g 0"
            ),
            "[1] 0"
        );
        assert_eq!(run(&mut d, "[2] login -u root -p pw"), "[2] 0");
        assert_eq!(
            run(&mut d, "[3] query_profile -c root -u root"),
            "[3] root Root r@x.com 10"
        );
    }

    #[test]
    fn test_exit_replies_bye() {
        let dir = tempdir().unwrap();
        let mut d = open_dispatcher(&dir);
        assert_eq!(
            d.handle("[99] exit"),
            Some(Reply::Exit("[99] bye".to_string()))
        );
    }

    #[test]
    fn test_malformed_flags_fail() {
        let dir = tempdir().unwrap();
        let mut d = open_dispatcher(&dir);
        assert_eq!(run(&mut d, "[5] login -u"), "[5] -1");
        assert_eq!(run(&mut d, "[6] login u root"), "[6] -1");
        // Oversized field values are rejected at the parse boundary.
        assert_eq!(
            run(
                &mut d,
                "[7] login -u this_name_is_far_longer_than_twenty_bytes -p pw"
            ),
            "[7] -1"
        );
    }

    #[test]
    fn test_op_time_of() {
        assert_eq!(op_time_of("[123]"), 123);
        assert_eq!(op_time_of("[0]"), 0);
        assert_eq!(op_time_of("nonsense"), 0);
    }
}
