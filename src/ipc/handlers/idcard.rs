use crate::config;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::users::{document_user, UserRecord};
use crate::ipc::helpers::{get_optional_str, with_session, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::render::idcard::{self, IdCardFields, IdCardImages, Side};
use serde_json::json;
use tracing::warn;

fn card_fields(user: &UserRecord, ctx: &Ctx<'_>) -> IdCardFields {
    let school = &ctx.config.school;
    IdCardFields {
        id: user.id.clone(),
        name: user.name.clone(),
        lrn: user.lrn.clone().unwrap_or_default(),
        grade_level: user.grade_level.clone().unwrap_or_default(),
        section: user.section.clone().unwrap_or_default(),
        adviser: user
            .adviser
            .clone()
            .unwrap_or_else(|| school.default_adviser.clone()),
        school_year: school.school_year.clone(),
        guardian_name: user.guardian_name.clone().unwrap_or_default(),
        guardian_phone: user.guardian_phone.clone().unwrap_or_default(),
    }
}

fn idcard_generate(
    ctx: &Ctx<'_>,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let side = match get_optional_str(params, "side") {
        Some(raw) => Side::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("side must be front or back"))?,
        None => Side::Front,
    };
    let user = document_user(ctx, params, "userId", "user")?;
    let cfg = &ctx.config.id_card;

    let assets_dir = config::resolve(ctx.workspace, &cfg.assets_dir);
    let background = idcard::load_background(&assets_dir, side).unwrap_or_else(|| {
        warn!(
            side = side.as_str(),
            dir = %assets_dir.display(),
            "id card background missing; rendering without it"
        );
        String::new()
    });
    let avatar = match side {
        Side::Front => idcard::resolve_avatar(
            user.avatar.as_deref(),
            &config::resolve(ctx.workspace, &cfg.uploads_dir),
            &user.name,
            &cfg.avatar_fallback_url,
        ),
        Side::Back => String::new(),
    };

    let svg = idcard::render_id_card(
        side,
        &card_fields(&user, ctx),
        &IdCardImages { background, avatar },
    )?;
    Ok(json!({
        "svg": svg,
        "contentType": "image/svg+xml",
        "side": side.as_str(),
        "width": idcard::CARD_WIDTH,
        "height": idcard::CARD_HEIGHT,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "idcard.generate" => Some(with_session(state, req, idcard_generate)),
        _ => None,
    }
}
