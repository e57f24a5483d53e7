/// Names for the raw `cmd` byte of a monitor frame.
///
/// The low bits are flags: bit 0 marks the send direction, bit 1 marks encrypted
/// traffic, and bit 2 marks a full IP/UDP packet rather than a bare payload.
#[repr(u8)]
#[derive(Eq, PartialEq, Copy, Clone, Debug)]
#[cfg_attr(test, derive(strum_macros::EnumCount))]
pub enum MonCommand {
    Recv,
    Send,
    EncRecv,
    EncSend,
    PktRecv,
    PktSend,
    PktEncRecv,
    PktEncSend,
    /// Keepalive, carries no telemetry
    Ping,
    /// Connection state text from the security module
    State,
    /// Reserved values, never sent by the security module so far
    Other(u8),
}

impl MonCommand {
    pub const BIT_SEND: u8 = 1;
    pub const BIT_ENCRYPT: u8 = 2;
    pub const BIT_PACKET: u8 = 4;

    /// Fixed-width label used in replay diagnostics
    pub fn label(&self) -> String {
        match self {
            MonCommand::Recv => "RCV".into(),
            MonCommand::Send => "SND".into(),
            MonCommand::EncRecv => "RCV-S".into(),
            MonCommand::EncSend => "SND-S".into(),
            MonCommand::PktRecv => "P-RCV".into(),
            MonCommand::PktSend => "P-SND".into(),
            MonCommand::PktEncRecv => "P-RCV-S".into(),
            MonCommand::PktEncSend => "P-SND-S".into(),
            MonCommand::Ping => "PING".into(),
            MonCommand::State => "STATE".into(),
            MonCommand::Other(x) => format!("RSVD{:02}", x),
        }
    }

    /// Whether the payload is an IP/UDP datagram rather than bare application data
    pub fn carries_ip_packet(&self) -> bool {
        let raw = u8::from(self);
        raw <= u8::from(MonCommand::PktEncSend) && raw & Self::BIT_PACKET != 0
    }
}

impl From<MonCommand> for u8 {
    fn from(cmd: MonCommand) -> Self {
        match cmd {
            MonCommand::Recv => 0,
            MonCommand::Send => 1,
            MonCommand::EncRecv => 2,
            MonCommand::EncSend => 3,
            MonCommand::PktRecv => 4,
            MonCommand::PktSend => 5,
            MonCommand::PktEncRecv => 6,
            MonCommand::PktEncSend => 7,
            MonCommand::Ping => 8,
            MonCommand::State => 16,
            MonCommand::Other(x) => x,
        }
    }
}

impl From<&MonCommand> for u8 {
    fn from(cmd: &MonCommand) -> Self {
        u8::from(*cmd)
    }
}

impl From<u8> for MonCommand {
    fn from(value: u8) -> Self {
        match value {
            x if x == Self::Recv => Self::Recv,
            x if x == Self::Send => Self::Send,
            x if x == Self::EncRecv => Self::EncRecv,
            x if x == Self::EncSend => Self::EncSend,
            x if x == Self::PktRecv => Self::PktRecv,
            x if x == Self::PktSend => Self::PktSend,
            x if x == Self::PktEncRecv => Self::PktEncRecv,
            x if x == Self::PktEncSend => Self::PktEncSend,
            x if x == Self::Ping => Self::Ping,
            x if x == Self::State => Self::State,
            x => Self::Other(x),
        }
    }
}

impl PartialEq<u8> for MonCommand {
    fn eq(&self, other: &u8) -> bool {
        u8::from(self) == *other
    }
}

impl PartialEq<MonCommand> for u8 {
    fn eq(&self, other: &MonCommand) -> bool {
        u8::from(other) == *self
    }
}

impl std::fmt::LowerHex for MonCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let val: u8 = self.into();
        std::fmt::LowerHex::fmt(&val, f)
    }
}

#[cfg(test)]
mod test {
    use super::MonCommand;
    use std::collections::HashSet;
    use strum::EnumCount;

    #[test]
    fn mon_command_roundtrip() {
        let mut seen = HashSet::new();
        for v in 0..=u8::MAX {
            let m = MonCommand::from(v);
            seen.insert(std::mem::discriminant(&m));
            assert_eq!(u8::from(m), v);
        }
        // If this fails, you may have forgotten to update From<u8>
        assert_eq!(seen.len(), MonCommand::COUNT)
    }

    #[test]
    fn ip_packet_commands() {
        let with_ip: Vec<u8> = (0..=u8::MAX)
            .filter(|&v| MonCommand::from(v).carries_ip_packet())
            .collect();
        assert_eq!(with_ip, vec![4, 5, 6, 7]);
    }

    #[test]
    fn labels() {
        assert_eq!(MonCommand::PktEncSend.label(), "P-SND-S");
        assert_eq!(MonCommand::from(9).label(), "RSVD09");
    }
}
