use serde::{Deserialize, Serialize};
use std::fmt;

/// The two principal populations of the platform. Salon staff authenticate
/// through the back-office, customers through the storefront; the wire
/// strings are shared with both clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    User,
    Customer,
}

impl ParticipantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantKind::User => "user",
            ParticipantKind::Customer => "customer",
        }
    }
}

/// An addressable principal: `(kind, id)`. The authoritative record lives in
/// the identity store; the realtime service only ever holds this reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub kind: ParticipantKind,
    pub id: i64,
}

impl Identity {
    pub fn user(id: i64) -> Self {
        Identity {
            kind: ParticipantKind::User,
            id,
        }
    }

    pub fn customer(id: i64) -> Self {
        Identity {
            kind: ParticipantKind::Customer,
            id,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind.as_str(), self.id)
    }
}

/// An authenticated identity plus its resolved scope. For salon staff
/// `salon_id` is always present (handshake refuses staff without one);
/// customers are not salon-scoped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub identity: Identity,
    pub salon_id: Option<i64>,
}

impl Principal {
    pub fn user(id: i64, salon_id: i64) -> Self {
        Principal {
            identity: Identity::user(id),
            salon_id: Some(salon_id),
        }
    }

    pub fn customer(id: i64) -> Self {
        Principal {
            identity: Identity::customer(id),
            salon_id: None,
        }
    }
}
