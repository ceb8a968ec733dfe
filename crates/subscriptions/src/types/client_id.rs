use std::fmt;
use uuid::Uuid;

/// Identity of one connected subscription client.
///
/// Every live client gets a fresh random identifier. [`ClientId::EMPTY`] is the
/// reserved "no client" value and is never handed out by [`ClientId::new`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct ClientId(Uuid);

impl ClientId {
    /// The sentinel identity that belongs to no client.
    pub const EMPTY: ClientId = ClientId(Uuid::nil());

    /// Generates a new random identity.
    pub fn new() -> Self {
        loop {
            let id = Uuid::new_v4();
            if !id.is_nil() {
                return Self(id)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl From<Uuid> for ClientId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}
