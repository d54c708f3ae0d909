use axum::http::HeaderMap;
use picedit_common::types::{ResourceId, UserView};
use serde::Deserialize;
use tracing::{debug, error};

use crate::auth::jwt::JwtAccessTokenService;
use crate::auth::token::extract_access_token;
use crate::directory::{Permission, PictureDirectory, WorkspaceKind};
use crate::error::HandshakeRejection;

/// Decoded query string of an edit-channel upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EditHandshakeQuery {
    #[serde(rename = "pictureId")]
    pub picture_id: Option<String>,
    pub access_token: Option<String>,
}

/// Facts attached to an approved upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditTicket {
    pub user: UserView,
    pub resource_id: ResourceId,
}

/// Decide whether a pending upgrade may join the edit room of a picture.
///
/// Checks run in a fixed order and stop at the first failure.
pub async fn admit(
    directory: &PictureDirectory,
    jwt: &JwtAccessTokenService,
    headers: &HeaderMap,
    query: &EditHandshakeQuery,
) -> Result<EditTicket, HandshakeRejection> {
    let resource_id = parse_resource_id(query.picture_id.as_deref())?;

    let user = resolve_identity(directory, jwt, headers, query.access_token.as_deref()).await?;

    let picture = directory
        .get_picture(resource_id)
        .await
        .map_err(directory_failure)?
        .ok_or(HandshakeRejection::ResourceNotFound)?;

    let workspace = match picture.workspace_id {
        Some(workspace_id) => {
            let workspace = directory
                .get_workspace(workspace_id)
                .await
                .map_err(directory_failure)?
                .ok_or(HandshakeRejection::WorkspaceNotFound)?;
            if workspace.kind != WorkspaceKind::Team {
                return Err(HandshakeRejection::PrivateWorkspace);
            }
            Some(workspace)
        }
        None => None,
    };

    let permissions =
        directory.permissions(workspace.as_ref(), &user).await.map_err(directory_failure)?;
    if !permissions.contains(&Permission::PictureEdit) {
        debug!(user_id = %user.id, resource_id = %resource_id, "caller lacks picture:edit");
        return Err(HandshakeRejection::EditPermissionDenied);
    }

    Ok(EditTicket { user, resource_id })
}

fn parse_resource_id(raw: Option<&str>) -> Result<ResourceId, HandshakeRejection> {
    let raw = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(HandshakeRejection::MissingResourceId)?;

    raw.parse::<ResourceId>().map_err(HandshakeRejection::InvalidResourceId)
}

async fn resolve_identity(
    directory: &PictureDirectory,
    jwt: &JwtAccessTokenService,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Result<UserView, HandshakeRejection> {
    let token =
        extract_access_token(headers, query_token).ok_or(HandshakeRejection::Unauthenticated)?;
    let user_id = jwt.validate_user_token(&token).map_err(|error| {
        debug!(error = %error, "access token rejected");
        HandshakeRejection::Unauthenticated
    })?;

    directory
        .get_user(user_id)
        .await
        .map_err(directory_failure)?
        .ok_or(HandshakeRejection::Unauthenticated)
}

fn directory_failure(error: anyhow::Error) -> HandshakeRejection {
    error!(error = ?error, "picture directory lookup failed during handshake");
    HandshakeRejection::Directory(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{Picture, SpaceRole, Workspace};
    use axum::extract::Query;
    use axum::http::{header::AUTHORIZATION, HeaderValue, Uri};
    use picedit_common::types::{IdParseError, UserId, UserRole, WorkspaceId};

    const SECRET: &str = "picedit_gatekeeper_secret_long_enough_for_hs256";

    struct Fixture {
        directory: PictureDirectory,
        jwt: JwtAccessTokenService,
    }

    fn user(id: i64, role: UserRole) -> UserView {
        UserView { id: UserId(id), name: format!("user-{id}"), avatar: None, profile: None, role }
    }

    async fn fixture() -> Fixture {
        let directory = PictureDirectory::in_memory();
        directory.insert_user(user(1, UserRole::User)).await;
        directory.insert_user(user(2, UserRole::User)).await;
        directory.insert_user(user(3, UserRole::Admin)).await;
        directory
            .insert_workspace(Workspace {
                id: WorkspaceId(10),
                kind: WorkspaceKind::Team,
                owner_id: UserId(1),
            })
            .await;
        directory
            .insert_workspace(Workspace {
                id: WorkspaceId(20),
                kind: WorkspaceKind::Private,
                owner_id: UserId(1),
            })
            .await;
        directory.insert_member(WorkspaceId(10), UserId(1), SpaceRole::Editor).await;
        directory.insert_member(WorkspaceId(10), UserId(2), SpaceRole::Viewer).await;
        directory
            .insert_picture(Picture { id: ResourceId(42), workspace_id: Some(WorkspaceId(10)) })
            .await;
        directory
            .insert_picture(Picture { id: ResourceId(43), workspace_id: Some(WorkspaceId(20)) })
            .await;
        directory
            .insert_picture(Picture { id: ResourceId(44), workspace_id: Some(WorkspaceId(99)) })
            .await;
        directory.insert_picture(Picture { id: ResourceId(45), workspace_id: None }).await;

        Fixture { directory, jwt: JwtAccessTokenService::new(SECRET).expect("jwt service") }
    }

    fn bearer(fixture: &Fixture, user_id: i64) -> HeaderMap {
        let token = fixture.jwt.issue_user_token(UserId(user_id)).expect("token issues");
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header value"),
        );
        headers
    }

    fn decode_query(query: Option<&str>) -> EditHandshakeQuery {
        let uri: Uri = match query {
            Some(query) => format!("/ws/picture/edit?{query}"),
            None => "/ws/picture/edit".to_string(),
        }
        .parse()
        .expect("uri should parse");
        Query::<EditHandshakeQuery>::try_from_uri(&uri).expect("query should decode").0
    }

    async fn check(
        fixture: &Fixture,
        user_id: Option<i64>,
        query: Option<&str>,
    ) -> Result<EditTicket, HandshakeRejection> {
        let headers = user_id.map(|id| bearer(fixture, id)).unwrap_or_default();
        admit(&fixture.directory, &fixture.jwt, &headers, &decode_query(query)).await
    }

    #[tokio::test]
    async fn team_editor_is_admitted() {
        let fixture = fixture().await;
        let ticket = check(&fixture, Some(1), Some("pictureId=42")).await.expect("admitted");
        assert_eq!(ticket.resource_id, ResourceId(42));
        assert_eq!(ticket.user.id, UserId(1));
    }

    #[tokio::test]
    async fn resource_id_is_checked_before_identity() {
        let fixture = fixture().await;
        assert!(matches!(
            check(&fixture, None, None).await,
            Err(HandshakeRejection::MissingResourceId)
        ));
        assert!(matches!(
            check(&fixture, None, Some("pictureId=")).await,
            Err(HandshakeRejection::MissingResourceId)
        ));
        assert!(matches!(
            check(&fixture, None, Some("pictureId=abc")).await,
            Err(HandshakeRejection::InvalidResourceId(IdParseError::NotDecimal(_)))
        ));
        assert!(matches!(
            check(&fixture, None, Some("pictureId=0")).await,
            Err(HandshakeRejection::InvalidResourceId(IdParseError::NotPositive(0)))
        ));
    }

    #[tokio::test]
    async fn identity_failures_are_unauthenticated() {
        let fixture = fixture().await;
        assert!(matches!(
            check(&fixture, None, Some("pictureId=42")).await,
            Err(HandshakeRejection::Unauthenticated)
        ));
        // Valid token for a user the directory does not know.
        assert!(matches!(
            check(&fixture, Some(77), Some("pictureId=42")).await,
            Err(HandshakeRejection::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn query_token_is_accepted() {
        let fixture = fixture().await;
        let token = fixture.jwt.issue_user_token(UserId(1)).expect("token issues");
        let query = format!("pictureId=42&access_token={token}");
        let ticket = admit(
            &fixture.directory,
            &fixture.jwt,
            &HeaderMap::new(),
            &decode_query(Some(&query)),
        )
        .await
        .expect("admitted");
        assert_eq!(ticket.user.id, UserId(1));
    }

    #[tokio::test]
    async fn percent_encoded_query_values_are_decoded() {
        let fixture = fixture().await;
        let token = fixture.jwt.issue_user_token(UserId(1)).expect("token issues");
        let encoded_token = token.replace('.', "%2E");
        let query = format!("pictureId=4%32&access_token={encoded_token}");

        let ticket = admit(
            &fixture.directory,
            &fixture.jwt,
            &HeaderMap::new(),
            &decode_query(Some(&query)),
        )
        .await
        .expect("admitted");
        assert_eq!(ticket.resource_id, ResourceId(42));
        assert_eq!(ticket.user.id, UserId(1));
    }

    #[test]
    fn duplicate_query_keys_fail_to_decode() {
        let uri: Uri = "/ws/picture/edit?pictureId=42&pictureId=43".parse().expect("uri parses");
        assert!(Query::<EditHandshakeQuery>::try_from_uri(&uri).is_err());
    }

    #[tokio::test]
    async fn resource_and_workspace_rules() {
        let fixture = fixture().await;
        assert!(matches!(
            check(&fixture, Some(1), Some("pictureId=999")).await,
            Err(HandshakeRejection::ResourceNotFound)
        ));
        assert!(matches!(
            check(&fixture, Some(1), Some("pictureId=44")).await,
            Err(HandshakeRejection::WorkspaceNotFound)
        ));
        assert!(matches!(
            check(&fixture, Some(1), Some("pictureId=43")).await,
            Err(HandshakeRejection::PrivateWorkspace)
        ));
    }

    #[tokio::test]
    async fn edit_permission_is_required() {
        let fixture = fixture().await;
        assert!(matches!(
            check(&fixture, Some(2), Some("pictureId=42")).await,
            Err(HandshakeRejection::EditPermissionDenied)
        ));
        // Public gallery: plain users only view, admins may edit.
        assert!(matches!(
            check(&fixture, Some(1), Some("pictureId=45")).await,
            Err(HandshakeRejection::EditPermissionDenied)
        ));
        assert!(check(&fixture, Some(3), Some("pictureId=45")).await.is_ok());
    }
}
