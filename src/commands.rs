//! Command handlers behind the CLI. Each one stands in for a screen:
//! login, profile, avatar profiles, timeline, new post and avatar upload.

use std::fmt::Write as _;
use std::path::Path;

use crate::auth::SessionContext;
use crate::config::{AvatarCommand, AvatarFields, Command, ProfileCommand};
use crate::data::{avatar_profiles, likes, posts};
use crate::editor::{AvatarProfileEditor, PostComposer, ProfileEditor, ProfileView};
use crate::error::{AppError, AppResult};
use crate::media::{CropRect, DisplaySize, ImageUploader};
use crate::models::{AvatarProfile, Post, Profile};
use crate::state::AppState;
use crate::timeline::{SortBy, Timeline};

/// Run one command and return what it prints.
pub async fn run(state: &AppState, ctx: &SessionContext, command: Command) -> AppResult<String> {
    match command {
        Command::Signup { email, password } => {
            let password = password.ok_or_else(|| AppError::BadRequest("Password required".into()))?;
            match state.auth.sign_up(&email, &password).await? {
                Some(session) => Ok(format!(
                    "Signed up and logged in as {}",
                    session.user.email.as_deref().unwrap_or(&email)
                )),
                None => Ok(format!("Check {} for a confirmation link", email)),
            }
        }
        Command::Login { email, password } => {
            let password = password.ok_or_else(|| AppError::BadRequest("Password required".into()))?;
            let session = state.auth.sign_in(&email, &password).await?;
            Ok(format!(
                "Logged in as {}",
                session.user.email.as_deref().unwrap_or(&session.user.id)
            ))
        }
        Command::Logout => {
            state.auth.sign_out().await?;
            Ok("Logged out".to_string())
        }
        Command::Whoami => Ok(match &ctx.session {
            Some(session) => format!(
                "{} ({})\nsession expires {}",
                session.user.email.as_deref().unwrap_or("-"),
                session.user.id,
                session.expires_at.to_rfc3339()
            ),
            None => "Not logged in".to_string(),
        }),
        Command::Profile { action } => profile(state, ctx, action).await,
        Command::Avatars { action } => avatars(state, ctx, action).await,
        Command::Timeline { sort, tag, pages } => timeline(state, ctx, sort, tag, pages).await,
        Command::Like { post_id } => like(state, ctx, &post_id).await,
        Command::Post { content, tags } => {
            let mut composer = PostComposer::new();
            composer.set_content(content);
            for tag in tags {
                composer.add_tag(tag);
            }
            let id = composer.submit(state.db.as_ref(), ctx).await?;
            Ok(format!("Posted {}", id))
        }
        Command::UploadAvatar {
            file,
            crop,
            display,
        } => upload_avatar(state, ctx, &file, crop, display).await,
    }
}

async fn profile(state: &AppState, ctx: &SessionContext, action: ProfileCommand) -> AppResult<String> {
    match action {
        ProfileCommand::Show { id } => {
            let id = match id {
                Some(id) => id,
                None => ctx.require_user()?.user_id().to_string(),
            };
            let view = ProfileView::load(state.db.as_ref(), &id).await?;
            let mut out = render_profile(&view.profile);
            out.push('\n');
            out.push_str(&render_avatar_profiles(&view.avatar_profiles));
            Ok(out)
        }
        ProfileCommand::Edit {
            username,
            full_name,
            bio,
        } => {
            let mut editor = ProfileEditor::load(state.db.as_ref(), ctx).await?;
            editor.start_editing();
            if let Some(draft) = editor.draft_mut() {
                if let Some(username) = username {
                    draft.username = username;
                }
                if let Some(full_name) = full_name {
                    draft.full_name = full_name;
                }
                if let Some(bio) = bio {
                    draft.bio = bio;
                }
            }
            let saved = editor.submit(state.db.as_ref()).await?;
            Ok(render_profile(saved))
        }
    }
}

async fn avatars(state: &AppState, ctx: &SessionContext, action: AvatarCommand) -> AppResult<String> {
    let db = state.db.as_ref();
    match action {
        AvatarCommand::List { user_id } => {
            let user_id = match user_id {
                Some(id) => id,
                None => ctx.require_user()?.user_id().to_string(),
            };
            let records = avatar_profiles::list_avatar_profiles(db, &user_id).await?;
            Ok(render_avatar_profiles(&records))
        }
        AvatarCommand::Add { fields } => {
            let owner = ctx.require_user()?.user_id();
            let mut editor = AvatarProfileEditor::load(db, owner).await?;
            apply_fields(&mut editor, fields);
            let saved = editor.submit(db).await?;
            Ok(format!("Added avatar profile {}", saved.id))
        }
        AvatarCommand::Update { id, fields } => {
            let owner = ctx.require_user()?.user_id();
            let mut editor = AvatarProfileEditor::load(db, owner).await?;
            editor.start_editing(&id)?;
            apply_fields(&mut editor, fields);
            let saved = editor.submit(db).await?;
            Ok(format!("Updated avatar profile {}", saved.id))
        }
        AvatarCommand::Delete { id } => {
            let owner = ctx.require_user()?.user_id();
            let mut editor = AvatarProfileEditor::load(db, owner).await?;
            editor.delete(db, &id).await?;
            Ok(format!("Deleted avatar profile {}", id))
        }
    }
}

fn apply_fields(editor: &mut AvatarProfileEditor, fields: AvatarFields) {
    let draft = editor.draft_mut();
    if let Some(v) = fields.service {
        draft.metaverse_service = v;
    }
    if let Some(v) = fields.service_url {
        draft.service_url = v;
    }
    if let Some(v) = fields.name {
        draft.avatar_name = v;
    }
    if let Some(v) = fields.avatar_id {
        draft.avatar_id = v;
    }
    if let Some(v) = fields.image_url {
        draft.avatar_image_url = v;
    }
}

async fn timeline(
    state: &AppState,
    ctx: &SessionContext,
    sort: SortBy,
    tag: Option<String>,
    pages: u32,
) -> AppResult<String> {
    let viewer = ctx.require_user()?.user_id().to_string();
    let db = state.db.as_ref();
    let mut feed = Timeline::new(Some(viewer));
    feed.set_sort_by(sort);
    feed.set_filter_tag(tag);

    feed.load_next(db).await;
    while feed.page() < pages.max(1) && feed.on_sentinel_visible() {
        feed.load_next(db).await;
    }

    let mut out = String::new();
    if feed.is_error() {
        out.push_str("Could not load posts.\n");
    }
    if feed.posts().is_empty() && !feed.is_error() {
        out.push_str("No posts yet.\n");
    }
    for post in feed.posts() {
        out.push_str(&render_post(post));
    }
    if feed.has_more() {
        let _ = writeln!(out, "(more with --pages {})", feed.page() + 1);
    }
    Ok(out)
}

async fn like(state: &AppState, ctx: &SessionContext, post_id: &str) -> AppResult<String> {
    let viewer = ctx.require_user()?.user_id();
    let db = state.db.as_ref();

    let post = posts::fetch_post(db, post_id, Some(viewer)).await?;
    if post.is_liked {
        likes::unlike_post(db, viewer, post_id).await?;
    } else {
        likes::like_post(db, viewer, post_id).await?;
    }

    let post = posts::fetch_post(db, post_id, Some(viewer)).await?;
    Ok(format!(
        "{} {} ({} likes)",
        if post.is_liked { "Liked" } else { "Unliked" },
        post.id,
        post.likes_count
    ))
}

async fn upload_avatar(
    state: &AppState,
    ctx: &SessionContext,
    file: &Path,
    crop: Option<CropRect>,
    display: Option<DisplaySize>,
) -> AppResult<String> {
    ctx.require_user()?;
    let mut uploader = ImageUploader::new(state.config.upload_target());
    uploader.select_file(file, display).await?;
    if let Some(crop) = crop {
        uploader.set_crop(crop)?;
    }
    uploader.complete_crop()?;
    let url = uploader.upload(state.storage.as_ref(), ctx).await?;

    let mut editor = ProfileEditor::load(state.db.as_ref(), ctx).await?;
    editor.apply_avatar_url(state.db.as_ref(), &url).await?;
    Ok(format!("Avatar updated: {}", url))
}

fn render_profile(profile: &Profile) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "@{} ({})", profile.username, profile.id);
    if !profile.full_name.is_empty() {
        let _ = writeln!(out, "{}", profile.full_name);
    }
    if let Some(ref url) = profile.avatar_url {
        let _ = writeln!(out, "avatar: {}", url);
    }
    if !profile.bio.is_empty() {
        let _ = writeln!(out, "{}", profile.bio);
    }
    out
}

fn render_avatar_profiles(records: &[AvatarProfile]) -> String {
    if records.is_empty() {
        return "No avatar profiles.\n".to_string();
    }
    let mut out = String::new();
    for record in records {
        let _ = writeln!(
            out,
            "{}  {} on {}",
            record.id, record.avatar_name, record.metaverse_service
        );
        if !record.service_url.is_empty() {
            let _ = writeln!(out, "    {}", record.service_url);
        }
    }
    out
}

fn render_post(post: &Post) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}  @{}  {}",
        post.id,
        post.author.username,
        post.created_at.format("%Y-%m-%d %H:%M")
    );
    let _ = writeln!(out, "    {}", post.content);
    if !post.metaverse_tags.is_empty() {
        let _ = writeln!(out, "    #{}", post.metaverse_tags.join(" #"));
    }
    let _ = writeln!(
        out,
        "    {} {}",
        if post.is_liked { "♥" } else { "♡" },
        post.likes_count
    );
    out
}
