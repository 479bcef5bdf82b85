use axum::extract::{Extension, State};
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{OptionExt, Result, msg};
use crate::extractors::{Json, Path};
use crate::middleware::AuthContext;
use crate::models::CourseAccess;

#[derive(Deserialize)]
pub struct CoursePath {
    pub course_id: String,
}

/// Whether the caller may open the course. This is how end users learn the
/// outcome of a payment.
pub async fn get_course_access(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(path): Path<CoursePath>,
) -> Result<Json<CourseAccess>> {
    let conn = state.db.get()?;

    let course = queries::get_course(&conn, &path.course_id)?.or_not_found(msg::COURSE_NOT_FOUND)?;
    let grant = queries::get_access_grant(&conn, &ctx.profile.id, &course.id)?;

    Ok(Json(CourseAccess {
        course_id: course.id,
        has_access: grant.is_some(),
        granted_at: grant.map(|g| g.granted_at),
    }))
}
