use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const WORLD_WIDTH: f32 = 800.0;
pub const WORLD_HEIGHT: f32 = 400.0;
pub const SPAWN_X: f32 = 400.0;
pub const SPAWN_Y: f32 = 200.0;
pub const BULLET_LIFE: i32 = 200;
pub const HIT_DISTANCE: f32 = 20.0;
pub const BOX_COUNT: u32 = 10;
pub const BOX_HP: i32 = 3;
pub const MIN_TICK_INTERVAL_MS: u64 = 100;
pub const DEFAULT_PORT: u16 = 12345;
/// Largest encoded message sent in one datagram; anything bigger is fragmented.
pub const MAX_DATAGRAM_SIZE: usize = 60_000;
/// Message text carried per fragment. JSON escaping at most doubles it.
pub const FRAGMENT_PAYLOAD_SIZE: usize = 16 * 1024;
/// Partially received messages kept around while newer ones arrive.
pub const MAX_PENDING_MESSAGES: u32 = 16;

/// Events sent by clients. Every datagram is a single JSON object tagged by `type`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ClientMessage {
    Connect,
    Move { x: f32, y: f32 },
    Shoot { dx: f32, dy: f32 },
    Pickup,
    Heartbeat,
    Disconnect,
}

/// Messages sent by the server.
///
/// `Update` and `Bullet` carry the same full snapshot; `Bullet` is what a
/// shoot event produces, everything else broadcasts `Update`. A message too
/// large for one datagram travels as a run of `Fragment`s holding slices of
/// its JSON text, see [`ServerMessage::encode_datagrams`] and [`Reassembler`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Connected { client_id: u32 },
    Update { game_state: WorldState },
    Bullet { game_state: WorldState },
    Rejected { reason: String },
    Disconnected { reason: String },
    Fragment {
        message_id: u32,
        index: u32,
        count: u32,
        data: String,
    },
}

impl ClientMessage {
    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl ServerMessage {
    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Encodes the message into datagrams no larger than [`MAX_DATAGRAM_SIZE`].
    ///
    /// Small messages stay a single datagram. Larger ones are split into
    /// fragments tagged with `message_id`, which the caller keeps unique per
    /// outgoing message.
    pub fn encode_datagrams(&self, message_id: u32) -> Result<Vec<Vec<u8>>, serde_json::Error> {
        let text = serde_json::to_string(self)?;
        if text.len() <= MAX_DATAGRAM_SIZE {
            return Ok(vec![text.into_bytes()]);
        }

        let chunks = split_text(&text, FRAGMENT_PAYLOAD_SIZE);
        let count = chunks.len() as u32;
        chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                ServerMessage::Fragment {
                    message_id,
                    index: index as u32,
                    count,
                    data: chunk.to_string(),
                }
                .encode()
            })
            .collect()
    }

    /// The world snapshot carried by this message, if any.
    pub fn game_state(&self) -> Option<&WorldState> {
        match self {
            ServerMessage::Update { game_state } | ServerMessage::Bullet { game_state } => {
                Some(game_state)
            }
            _ => None,
        }
    }
}

/// Splits `text` into pieces of at most `max_len` bytes on char boundaries.
fn split_text(text: &str, max_len: usize) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let mut end = rest.len().min(max_len);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }

    chunks
}

/// Client-side buffer that turns received fragments back into messages.
///
/// Delivery is unreliable: a message missing any fragment is never produced,
/// and its partial state is dropped once it falls [`MAX_PENDING_MESSAGES`]
/// ids behind the newest fragment seen.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: HashMap<u32, Vec<Option<String>>>,
}

impl Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one datagram, returning a message once one is complete.
    pub fn accept(&mut self, data: &[u8]) -> Result<Option<ServerMessage>, serde_json::Error> {
        match ServerMessage::decode(data)? {
            ServerMessage::Fragment {
                message_id,
                index,
                count,
                data,
            } => self.accept_fragment(message_id, index, count, data),
            message => Ok(Some(message)),
        }
    }

    fn accept_fragment(
        &mut self,
        message_id: u32,
        index: u32,
        count: u32,
        data: String,
    ) -> Result<Option<ServerMessage>, serde_json::Error> {
        if count == 0 || index >= count {
            return Ok(None);
        }

        self.pending.retain(|&id, _| {
            message_id.wrapping_sub(id) < MAX_PENDING_MESSAGES
                || id.wrapping_sub(message_id) < MAX_PENDING_MESSAGES
        });

        let slots = self
            .pending
            .entry(message_id)
            .or_insert_with(|| vec![None; count as usize]);
        if slots.len() != count as usize {
            *slots = vec![None; count as usize];
        }
        slots[index as usize] = Some(data);

        if slots.iter().any(Option::is_none) {
            return Ok(None);
        }

        let text: String = self
            .pending
            .remove(&message_id)
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .collect();
        ServerMessage::decode(text.as_bytes()).map(Some)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Player {
    pub x: f32,
    pub y: f32,
    pub has_gun: bool,
}

impl Player {
    pub fn spawn() -> Self {
        Self {
            x: SPAWN_X,
            y: SPAWN_Y,
            has_gun: false,
        }
    }
}

/// A stationary destructible box.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Obstacle {
    pub x: f32,
    pub y: f32,
    pub hp: i32,
}

impl Obstacle {
    pub fn new(x: f32, y: f32, hp: i32) -> Self {
        Self { x, y, hp }
    }

    /// Axis-aligned proximity test used for bullet hits.
    pub fn is_hit_by(&self, bullet: &Bullet) -> bool {
        (bullet.x - self.x).abs() < HIT_DISTANCE && (bullet.y - self.y).abs() < HIT_DISTANCE
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Bullet {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
    pub life: i32,
}

impl Bullet {
    pub fn new(x: f32, y: f32, dx: f32, dy: f32) -> Self {
        Self {
            x,
            y,
            dx,
            dy,
            life: BULLET_LIFE,
        }
    }

    /// Moves the bullet by its velocity and burns one tick of life.
    pub fn advance(&mut self) {
        self.x += self.dx;
        self.y += self.dy;
        self.life -= 1;
    }

    pub fn in_bounds(&self) -> bool {
        (0.0..=WORLD_WIDTH).contains(&self.x) && (0.0..=WORLD_HEIGHT).contains(&self.y)
    }

    pub fn is_expired(&self) -> bool {
        self.life <= 0
    }
}

/// Complete snapshot of everything the server simulates.
///
/// Boxes and bullets are ordered maps so that iteration follows creation
/// order, which decides which box a bullet hits when several overlap.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct WorldState {
    pub players: HashMap<u32, Player>,
    pub boxes: BTreeMap<u32, Obstacle>,
    pub bullets: BTreeMap<u64, Bullet>,
}

impl WorldState {
    /// World with the standard box layout and no players or bullets.
    pub fn seeded() -> Self {
        let boxes = (0..BOX_COUNT)
            .map(|i| {
                let offset = i as f32;
                (i, Obstacle::new(100.0 + offset * 50.0, 100.0 + offset * 30.0, BOX_HP))
            })
            .collect();

        Self {
            players: HashMap::new(),
            boxes,
            bullets: BTreeMap::new(),
        }
    }
}
