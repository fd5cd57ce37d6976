use super::{AppError, auth::AuthCtx};
use axum::response::Response;
use axum::{
    extract::OriginalUri,
    http::{Method, Request},
    middleware::Next,
};
use classhelp_shared::auth::Role;
use classhelp_shared::domain::StudentId;
use classhelp_shared::jwt::JwtClaims;
use percent_encoding::percent_decode_str;

pub async fn enforce_acl(
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|orig| orig.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();
    let Some(auth) = req.extensions().get::<AuthCtx>() else {
        return Err(AppError::unauthorized());
    };
    let claims = &auth.claims;

    let segs = segmented(&path);
    let prefix = ["api", "v1"];
    if !segs.as_slice().starts_with(&prefix) {
        tracing::warn!(?segs, "ACL: path outside API scope");
        return Err(AppError::forbidden());
    }
    let rest = &segs[prefix.len()..];

    let decision = match claims.role {
        // Teachers administer everything the API exposes.
        Role::Teacher => Ok(()),
        Role::Student => allow_student(&method, rest, claims),
    };

    if let Err(err) = decision {
        tracing::warn!(
            method = %method,
            path = %path,
            username = %claims.sub,
            role = ?claims.role,
            "ACL: no rule matched; denying"
        );
        return Err(err);
    }

    Ok(next.run(req).await)
}

fn allow_student(method: &Method, rest: &[&str], claims: &JwtClaims) -> Result<(), AppError> {
    match rest {
        ["auth", "logout"] if *method == Method::POST => Ok(()),
        ["students", student, tail @ ..] => {
            ensure_student(claims, student)?;
            allow_student_resource(method, tail)
        }
        ["class", class, tail @ ..] if *method == Method::GET => {
            ensure_own_class(claims, class)?;
            match tail {
                ["board"] | ["helping"] | ["students"] | ["points"] | ["events"] => Ok(()),
                _ => Err(AppError::forbidden()),
            }
        }
        _ => Err(AppError::forbidden()),
    }
}

fn allow_student_resource(method: &Method, tail: &[&str]) -> Result<(), AppError> {
    match tail {
        ["help"] if *method == Method::GET || *method == Method::POST => Ok(()),
        ["help"] if *method == Method::DELETE => Ok(()),
        ["help", "complete"] if *method == Method::POST => Ok(()),
        ["help", "cooldown"] if *method == Method::GET => Ok(()),
        ["help", "thanks-count"] if *method == Method::GET => Ok(()),
        // Reading own points is fine; writing them is a teacher action.
        ["points"] if *method == Method::GET => Ok(()),
        ["records"] if *method == Method::GET || *method == Method::POST => Ok(()),
        ["messages"] if *method == Method::POST => Ok(()),
        ["messages", "unread"] if *method == Method::GET => Ok(()),
        ["messages", id, "read"] if *method == Method::POST && id.parse::<i32>().is_ok() => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}

fn segmented(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn decode(seg: &str) -> String {
    percent_decode_str(seg).decode_utf8_lossy().to_string()
}

fn ensure_student(claims: &JwtClaims, seg: &str) -> Result<(), AppError> {
    let expected = claims.student_id.as_ref().ok_or_else(AppError::forbidden)?;
    let provided = decode(seg);
    if expected == &provided {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}

fn ensure_own_class(claims: &JwtClaims, seg: &str) -> Result<(), AppError> {
    let student = claims.student_id.as_ref().ok_or_else(AppError::forbidden)?;
    let own = StudentId::parse(student)
        .map_err(|_| AppError::forbidden())?
        .class_ref();
    let provided = decode(seg);
    if own.to_string() == provided {
        Ok(())
    } else {
        Err(AppError::forbidden())
    }
}
