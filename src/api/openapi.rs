use super::handlers::{admin, auth, health, payments, users};
use utoipa::openapi::{Contact, InfoBuilder, License};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::version,
        auth::signup::new_user,
        auth::signup::verify_new_user,
        auth::signup::resend_verification,
        auth::session::login,
        auth::session::logout,
        auth::session::me,
        auth::password::reset_password,
        auth::password::change_password,
        auth::identity::update_key,
        auth::identity::verify_update_key,
        users::user_details,
        users::change_username,
        users::edit_user,
        payments::registration_payment,
        admin::list_users,
        admin::rescan_payments,
        admin::manage_user,
    ),
    tags(
        (name = "health", description = "Liveness and build info"),
        (name = "auth", description = "Signup, verification, sessions and credentials"),
        (name = "users", description = "User profiles"),
        (name = "payments", description = "Registration paywall"),
        (name = "admin", description = "Admin-only user management"),
    )
)]
struct ApiDoc;

/// The `OpenAPI` document with Cargo metadata as its info block.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info = cargo_info();
    doc
}

fn cargo_info() -> utoipa::openapi::Info {
    // Use Cargo.toml metadata instead of the utoipa crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();
    info
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    fn non_empty(s: &str) -> Option<&str> {
        (!s.is_empty()).then_some(s)
    }
    match author.find('<') {
        Some(start) => (
            non_empty(author[..start].trim()),
            non_empty(author[start + 1..].trim_end_matches('>').trim()),
        ),
        None => (non_empty(author.trim()), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let doc = openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));

        let contact = doc.info.contact;
        assert!(contact.is_some());
        if let Some(contact) = contact {
            assert_eq!(contact.name.as_deref(), Some("Team Turnstile"));
            assert_eq!(contact.email.as_deref(), Some("team@turnstile.dev"));
        }

        let license = doc.info.license;
        assert_eq!(license.map(|l| l.name), Some("BSD-3-Clause".to_string()));
    }

    #[test]
    fn openapi_documents_every_route() {
        let doc = openapi();
        for path in [
            "/health",
            "/api/v1/login",
            "/api/v1/user/{user_id}",
            "/api/v1/user/payments/rescan",
            "/api/v1/user/manage",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let tags = doc.tags.unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "admin"));
    }

    #[test]
    fn parse_author_variants() {
        assert_eq!(
            parse_author("Jane <jane@x.com>"),
            (Some("Jane"), Some("jane@x.com"))
        );
        assert_eq!(parse_author("Jane"), (Some("Jane"), None));
        assert_eq!(parse_author("<jane@x.com>"), (None, Some("jane@x.com")));
    }
}
