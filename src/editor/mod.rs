//! Form state for the profile screens and the new-post dialog.
//!
//! Editors hold a local draft and only write it on submit; a failed submit
//! leaves the draft in place so it can be corrected and sent again.

pub mod avatar_profile;
pub mod post;
pub mod profile;

pub use avatar_profile::{AvatarProfileEditor, AvatarProfileMode};
pub use post::PostComposer;
pub use profile::{ProfileEditor, ProfileEditorState, ProfileView};
