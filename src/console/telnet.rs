//! Telnet option negotiation for console sessions.
//!
//! The console offers a fixed capability set (it will echo and suppress
//! go-ahead) and refuses everything the peer proposes. [`TelnetMachine`]
//! sits in front of line editing: it passes user data through, answers
//! negotiation commands, and swallows sub-negotiations whole.

/// Interpret As Command
pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
/// Sub-negotiation begin
pub const SB: u8 = 250;
/// Sub-negotiation end
pub const SE: u8 = 240;

pub const OPT_ECHO: u8 = 1;
pub const OPT_SUPPRESS_GO_AHEAD: u8 = 3;

/// Sent to every new network console: we suppress go-ahead and echo
/// locally, and ask the client not to echo.
#[rustfmt::skip]
pub const INITIAL_NEGOTIATION: [u8; 9] = [
    IAC, WILL, OPT_SUPPRESS_GO_AHEAD,
    IAC, WILL, OPT_ECHO,
    IAC, DONT, OPT_ECHO,
];

/// What a single input byte turned into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Negotiation {
    /// A byte of user data for line editing.
    Data(u8),
    /// Part of a command; nothing to do yet.
    Consumed,
    /// A complete option command that must be answered with these bytes.
    Reply([u8; 3]),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum State {
    #[default]
    Idle,
    Escape,
    Option(u8),
    Sub { saw_iac: bool },
}

#[derive(Clone, Debug, Default)]
pub struct TelnetMachine {
    state: State,
}

impl TelnetMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no command is partially received.
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    pub fn push(&mut self, byte: u8) -> Negotiation {
        match self.state {
            State::Idle => {
                if byte == IAC {
                    self.state = State::Escape;
                    Negotiation::Consumed
                } else {
                    Negotiation::Data(byte)
                }
            }
            State::Escape => match byte {
                IAC => {
                    self.state = State::Idle;
                    Negotiation::Data(IAC)
                }
                SB => {
                    self.state = State::Sub { saw_iac: false };
                    Negotiation::Consumed
                }
                WILL | WONT | DO | DONT => {
                    self.state = State::Option(byte);
                    Negotiation::Consumed
                }
                // One-byte commands (NOP, break, go-ahead and friends) are ignored.
                _ => {
                    self.state = State::Idle;
                    Negotiation::Consumed
                }
            },
            State::Option(command) => {
                self.state = State::Idle;
                match command {
                    WILL => Negotiation::Reply([IAC, DONT, byte]),
                    DO if byte == OPT_ECHO || byte == OPT_SUPPRESS_GO_AHEAD => {
                        Negotiation::Consumed
                    }
                    DO => Negotiation::Reply([IAC, WONT, byte]),
                    _ => Negotiation::Consumed,
                }
            }
            State::Sub { saw_iac } => {
                self.state = match (saw_iac, byte) {
                    (true, SE) => State::Idle,
                    (true, _) => State::Sub { saw_iac: false },
                    (false, IAC) => State::Sub { saw_iac: true },
                    (false, _) => State::Sub { saw_iac: false },
                };
                Negotiation::Consumed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(machine: &mut TelnetMachine, bytes: &[u8]) -> Vec<Negotiation> {
        bytes.iter().map(|b| machine.push(*b)).collect()
    }

    #[test]
    fn will_is_refused_with_dont() {
        let mut m = TelnetMachine::new();
        let out = feed(&mut m, &[IAC, WILL, OPT_ECHO]);
        assert_eq!(
            out,
            vec![
                Negotiation::Consumed,
                Negotiation::Consumed,
                Negotiation::Reply([IAC, DONT, OPT_ECHO])
            ]
        );
        assert!(m.is_idle());
    }

    #[test]
    fn double_iac_is_literal_data() {
        let mut m = TelnetMachine::new();
        let out = feed(&mut m, &[IAC, IAC]);
        assert_eq!(out, vec![Negotiation::Consumed, Negotiation::Data(0xFF)]);
        assert!(m.is_idle());
    }

    #[test]
    fn do_of_offered_options_is_silent() {
        let mut m = TelnetMachine::new();
        let out = feed(&mut m, &[IAC, DO, OPT_ECHO, IAC, DO, OPT_SUPPRESS_GO_AHEAD]);
        assert!(out.iter().all(|n| *n == Negotiation::Consumed));
    }

    #[test]
    fn do_of_other_option_is_refused_with_wont() {
        let mut m = TelnetMachine::new();
        let out = feed(&mut m, &[IAC, DO, 31]);
        assert_eq!(out[2], Negotiation::Reply([IAC, WONT, 31]));
    }

    #[test]
    fn wont_and_dont_need_no_reply() {
        let mut m = TelnetMachine::new();
        let out = feed(&mut m, &[IAC, WONT, OPT_ECHO, IAC, DONT, OPT_ECHO]);
        assert!(out.iter().all(|n| *n == Negotiation::Consumed));
        assert!(m.is_idle());
    }

    #[test]
    fn one_byte_commands_are_ignored() {
        let mut m = TelnetMachine::new();
        // IAC NOP, then plain data.
        let out = feed(&mut m, &[IAC, 241, b'a']);
        assert_eq!(
            out,
            vec![Negotiation::Consumed, Negotiation::Consumed, Negotiation::Data(b'a')]
        );
    }

    #[test]
    fn subnegotiation_is_discarded_until_iac_se() {
        let mut m = TelnetMachine::new();
        // NAWS 80x24, with an escaped IAC inside the payload.
        let out = feed(&mut m, &[IAC, SB, 31, 0, 80, IAC, IAC, 0, 24, IAC, SE, b'x']);
        let (sub, rest) = out.split_at(11);
        assert!(sub.iter().all(|n| *n == Negotiation::Consumed));
        assert_eq!(rest, &[Negotiation::Data(b'x')]);
        assert!(m.is_idle());
    }

    #[test]
    fn plain_bytes_pass_through() {
        let mut m = TelnetMachine::new();
        let out = feed(&mut m, b"hi\r");
        assert_eq!(
            out,
            vec![
                Negotiation::Data(b'h'),
                Negotiation::Data(b'i'),
                Negotiation::Data(b'\r')
            ]
        );
    }
}
