//! Protocol Messages
//!
//! Wire format for host-client communication over TCP.
//! Every message is one newline-terminated UTF-8 text line, built from
//! `:`-separated fields, so a session can be driven (and debugged) with
//! nothing more than a telnet client.

/// Field separator inside a message line.
pub const FIELD_SEPARATOR: char = ':';

/// Separator between nicknames in a roster snapshot.
pub const LIST_SEPARATOR: char = ',';

/// Keepalive probe, sent host -> client.
pub const PING: &str = "Ping!";

/// Keepalive reply, sent client -> host.
pub const PONG: &str = "Pong!";

// =============================================================================
// MESSAGES
// =============================================================================

/// A parsed wire message.
///
/// The same enum covers both directions; which variants a peer is willing
/// to act on depends on its session role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Handshake, client -> host: binds the new connection to a nickname.
    Join {
        /// Nickname the joining participant wants to be known by.
        nickname: String,
    },

    /// Full roster snapshot, host -> clients. Slot order, host first.
    LobbyState {
        /// Populated slots in slot order.
        nicknames: Vec<String>,
    },

    /// Next scene to load, host -> clients.
    Map {
        /// Scene name understood by the surrounding simulation.
        name: String,
    },

    /// Loadout choice, client -> host.
    TankSelect {
        /// Choosing participant.
        nickname: String,
        /// Chosen loadout id.
        loadout: String,
    },

    /// Spawn notification, host -> clients.
    Spawn {
        /// Participant the entity belongs to.
        nickname: String,
        /// Loadout the entity was created from.
        loadout: String,
    },

    /// Keepalive probe, host -> client.
    Ping,

    /// Keepalive reply, client -> host.
    Pong,
}

/// Protocol-level parse failures. Policy is log-and-ignore: a malformed
/// line never closes the connection it arrived on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The line was empty.
    #[error("empty message line")]
    Empty,

    /// The line did not start with a known message keyword.
    #[error("unknown message kind: {0:?}")]
    UnknownKind(String),

    /// A required field was missing or empty.
    #[error("missing field in {kind} message")]
    MissingField {
        /// Keyword of the offending message.
        kind: &'static str,
    },

    /// An identifier carried a reserved delimiter character.
    #[error("illegal identifier {value:?}")]
    IllegalIdentifier {
        /// The rejected identifier.
        value: String,
    },
}

impl Message {
    /// Encode as a wire line, without the trailing newline.
    pub fn encode(&self) -> String {
        match self {
            Message::Join { nickname } => format!("JOIN:{nickname}"),
            Message::LobbyState { nicknames } => {
                format!("LOBBY_STATE:{}", nicknames.join(","))
            }
            Message::Map { name } => format!("MAP:{name}"),
            Message::TankSelect { nickname, loadout } => {
                format!("TANK_SELECT:{nickname}:{loadout}")
            }
            Message::Spawn { nickname, loadout } => format!("SPAWN:{nickname}:{loadout}"),
            Message::Ping => PING.to_string(),
            Message::Pong => PONG.to_string(),
        }
    }

    /// Parse one wire line (newline already stripped).
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        // Keepalives are bare literals, not keyword:payload lines.
        match line {
            PING => return Ok(Message::Ping),
            PONG => return Ok(Message::Pong),
            _ => {}
        }

        let (kind, payload) = match line.split_once(FIELD_SEPARATOR) {
            Some(parts) => parts,
            None => return Err(ProtocolError::UnknownKind(line.to_string())),
        };

        match kind {
            "JOIN" => Ok(Message::Join {
                nickname: identifier("JOIN", payload)?,
            }),
            "LOBBY_STATE" => {
                if payload.is_empty() {
                    return Err(ProtocolError::MissingField {
                        kind: "LOBBY_STATE",
                    });
                }
                let nicknames = payload
                    .split(LIST_SEPARATOR)
                    .map(|name| identifier("LOBBY_STATE", name))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Message::LobbyState { nicknames })
            }
            "MAP" => Ok(Message::Map {
                name: identifier("MAP", payload)?,
            }),
            "TANK_SELECT" => {
                let (nickname, loadout) = pair("TANK_SELECT", payload)?;
                Ok(Message::TankSelect { nickname, loadout })
            }
            "SPAWN" => {
                let (nickname, loadout) = pair("SPAWN", payload)?;
                Ok(Message::Spawn { nickname, loadout })
            }
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

/// Whether `value` may travel as a nickname or loadout id. The wire format
/// has no escaping, so the delimiters themselves are banned.
pub fn valid_identifier(value: &str) -> bool {
    !value.is_empty()
        && !value
            .chars()
            .any(|c| c == FIELD_SEPARATOR || c == LIST_SEPARATOR || c == '\n' || c == '\r')
}

/// Strip reserved delimiters from a locally-entered identifier.
/// Returns `None` when nothing survives.
pub fn sanitize_identifier(value: &str) -> Option<String> {
    let cleaned: String = value
        .chars()
        .filter(|c| *c != FIELD_SEPARATOR && *c != LIST_SEPARATOR && *c != '\n' && *c != '\r')
        .collect();
    let cleaned = cleaned.trim().to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

fn identifier(kind: &'static str, value: &str) -> Result<String, ProtocolError> {
    if value.is_empty() {
        return Err(ProtocolError::MissingField { kind });
    }
    if !valid_identifier(value) {
        return Err(ProtocolError::IllegalIdentifier {
            value: value.to_string(),
        });
    }
    Ok(value.to_string())
}

fn pair(kind: &'static str, payload: &str) -> Result<(String, String), ProtocolError> {
    let (first, second) = payload
        .split_once(FIELD_SEPARATOR)
        .ok_or(ProtocolError::MissingField { kind })?;
    Ok((identifier(kind, first)?, identifier(kind, second)?))
}
