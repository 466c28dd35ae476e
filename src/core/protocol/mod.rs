// src/core/protocol/mod.rs

pub mod frame;
pub mod message;
pub use frame::{DEFAULT_MAX_FRAME_SIZE, JsonFrameCodec, extract_first_frame};
pub use message::{
    AckStatus, ChangeNameRequest, ChangePasswordRequest, ChatMessage, ClientMessage, FileHeader,
    FriendInfo, LoginRequest, ServerMessage,
};
