//! Chat room membership
//!
//! A room is the set of participants eligible to receive its broadcasts.
//! Members are domain-level descriptors only; the transport handles live in
//! the notifier's registry and are cross-referenced by id.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::RoomError;
use crate::event::{UserJoinedRoom, UserLeftRoom};
use crate::types::{ClientDescriptor, ClientId};

/// A single chat room
///
/// Membership is unique by id and kept in join order, so snapshots (and
/// therefore broadcasts) visit members in a stable order.
#[derive(Debug)]
pub struct ChatRoom {
    id: String,
    name: String,
    members: RwLock<Vec<ClientDescriptor>>,
}

impl ChatRoom {
    /// Create an empty room
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            members: RwLock::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a client to the room
    ///
    /// If the id is already a member its name is replaced (last write wins)
    /// and no duplicate entry is created.
    pub fn let_client_in(&self, id: ClientId, name: String) -> UserJoinedRoom {
        let mut members = self.write();

        match members.iter_mut().find(|member| member.id == id) {
            Some(member) => member.name = name.clone(),
            None => members.push(ClientDescriptor {
                id,
                name: name.clone(),
            }),
        }

        UserJoinedRoom { name }
    }

    /// Remove a client from the room
    ///
    /// Fails with [`RoomError::NotAMember`] if the client is not present, so a
    /// second leave never produces a second event.
    pub fn let_client_out(&self, id: &ClientId) -> Result<UserLeftRoom, RoomError> {
        let mut members = self.write();

        let index = members
            .iter()
            .position(|member| &member.id == id)
            .ok_or_else(|| RoomError::NotAMember(id.clone()))?;
        let member = members.remove(index);

        Ok(UserLeftRoom { name: member.name })
    }

    /// Snapshot of the current members
    pub fn get_clients(&self) -> Vec<ClientDescriptor> {
        self.read().clone()
    }

    /// Display name of a member
    pub fn client_name(&self, id: &ClientId) -> Option<String> {
        self.read()
            .iter()
            .find(|member| &member.id == id)
            .map(|member| member.name.clone())
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.read().iter().any(|member| &member.id == id)
    }

    pub fn participant_count(&self) -> usize {
        self.read().len()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ClientDescriptor>> {
        self.members.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ClientDescriptor>> {
        self.members.write().unwrap_or_else(PoisonError::into_inner)
    }
}
