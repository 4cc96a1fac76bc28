//! Application events
//!
//! Produced by room membership changes and consumed only by the chat
//! service, which turns them into timestamped wire messages. Never sent
//! over the wire themselves.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserJoinedRoom {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLeftRoom {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplicationEvent {
    UserJoinedRoom(UserJoinedRoom),
    UserLeftRoom(UserLeftRoom),
}

impl From<UserJoinedRoom> for ApplicationEvent {
    fn from(event: UserJoinedRoom) -> Self {
        ApplicationEvent::UserJoinedRoom(event)
    }
}

impl From<UserLeftRoom> for ApplicationEvent {
    fn from(event: UserLeftRoom) -> Self {
        ApplicationEvent::UserLeftRoom(event)
    }
}
