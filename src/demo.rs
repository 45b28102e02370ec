//! Demo protocol
//!
//! Message ids shared by the `framelink-server` and `framelink-client`
//! binaries.
//!
//! | Id              | Direction        | Body                          |
//! |-----------------|------------------|-------------------------------|
//! | `ServerAccept`  | server → client  | empty                         |
//! | `ServerPing`    | both             | `u64` send time (µs)          |
//! | `MessageAll`    | client → server  | UTF-8 text                    |
//! | `ServerMessage` | server → client  | UTF-8 text, then sender `u32` |

use crate::message::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DemoMessage {
    ServerAccept = 0,
    ServerPing = 1,
    MessageAll = 2,
    ServerMessage = 3,
}

impl MessageId for DemoMessage {
    fn to_wire(self) -> u32 {
        self as u32
    }

    fn from_wire(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(DemoMessage::ServerAccept),
            1 => Some(DemoMessage::ServerPing),
            2 => Some(DemoMessage::MessageAll),
            3 => Some(DemoMessage::ServerMessage),
            _ => None,
        }
    }
}
