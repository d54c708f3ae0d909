// Read-only view of users, pictures, and spaces.
//
// The relay never writes to the directory. Production deployments point it at
// the shared PostgreSQL database; local runs and tests use the in-memory
// variant seeded through the `insert_*` helpers.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::Context;
use picedit_common::types::{ResourceId, UserId, UserRole, UserView, WorkspaceId};
use sqlx::Row;
use tokio::sync::RwLock;

use crate::db::pool::{check_pool_health, create_pg_pool, PoolConfig};

/// Picture row as far as the edit channel is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Picture {
    pub id: ResourceId,
    /// `None` for pictures in the public gallery.
    pub workspace_id: Option<WorkspaceId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceKind {
    Private,
    Team,
}

impl WorkspaceKind {
    pub fn from_db_value(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::Private),
            1 => Some(Self::Team),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub kind: WorkspaceKind,
    pub owner_id: UserId,
}

/// Role of a member inside a team space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpaceRole {
    Viewer,
    Editor,
    Admin,
}

impl SpaceRole {
    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "viewer" => Some(Self::Viewer),
            "editor" => Some(Self::Editor),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    fn permissions(self) -> &'static [Permission] {
        match self {
            Self::Viewer => &[Permission::PictureView],
            Self::Editor => &[
                Permission::PictureView,
                Permission::PictureUpload,
                Permission::PictureEdit,
                Permission::PictureDelete,
            ],
            Self::Admin => Permission::ALL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    SpaceUserManage,
    PictureView,
    PictureUpload,
    PictureEdit,
    PictureDelete,
}

impl Permission {
    pub const ALL: &'static [Permission] = &[
        Self::SpaceUserManage,
        Self::PictureView,
        Self::PictureUpload,
        Self::PictureEdit,
        Self::PictureDelete,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SpaceUserManage => "spaceUser:manage",
            Self::PictureView => "picture:view",
            Self::PictureUpload => "picture:upload",
            Self::PictureEdit => "picture:edit",
            Self::PictureDelete => "picture:delete",
        }
    }
}

pub type PermissionSet = BTreeSet<Permission>;

/// Permissions `user` holds on pictures in `workspace`.
///
/// `member_role` is the caller's role in a team space, if any; it is ignored
/// for public and private contexts.
pub fn resolve_permissions(
    workspace: Option<&Workspace>,
    user: &UserView,
    member_role: Option<SpaceRole>,
) -> PermissionSet {
    let all = || Permission::ALL.iter().copied().collect();
    match workspace {
        None if user.role.is_admin() => all(),
        None => PermissionSet::from([Permission::PictureView]),
        Some(workspace) => match workspace.kind {
            WorkspaceKind::Private => {
                if workspace.owner_id == user.id || user.role.is_admin() {
                    all()
                } else {
                    PermissionSet::new()
                }
            }
            WorkspaceKind::Team => member_role
                .map(|role| role.permissions().iter().copied().collect())
                .unwrap_or_default(),
        },
    }
}

#[derive(Debug, Default)]
pub struct MemoryDirectory {
    users: HashMap<UserId, UserView>,
    pictures: HashMap<ResourceId, Picture>,
    workspaces: HashMap<WorkspaceId, Workspace>,
    members: HashMap<(WorkspaceId, UserId), SpaceRole>,
}

#[derive(Clone)]
pub enum PictureDirectory {
    Postgres(sqlx::PgPool),
    Memory(Arc<RwLock<MemoryDirectory>>),
}

impl PictureDirectory {
    pub async fn connect(database_url: &str, pool_config: &PoolConfig) -> anyhow::Result<Self> {
        let pool = create_pg_pool(database_url, pool_config)
            .await
            .context("failed to initialize picture directory pool")?;
        check_pool_health(&pool).await?;

        Ok(Self::Postgres(pool))
    }

    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryDirectory::default())))
    }

    pub async fn get_user(&self, user_id: UserId) -> anyhow::Result<Option<UserView>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query(
                    r#"
                    SELECT id, user_name, user_avatar, user_profile, user_role
                    FROM users
                    WHERE id = $1
                      AND is_delete = 0
                    "#,
                )
                .bind(user_id.get())
                .fetch_optional(pool)
                .await
                .context("failed to query user for edit session")?;

                let Some(row) = row else {
                    return Ok(None);
                };
                let role: String = row.try_get("user_role")?;
                let role = UserRole::from_db_value(&role)
                    .ok_or_else(|| anyhow::anyhow!("invalid user role '{role}' in database"))?;

                Ok(Some(UserView {
                    id: UserId(row.try_get("id")?),
                    name: row.try_get::<Option<String>, _>("user_name")?.unwrap_or_default(),
                    avatar: row.try_get("user_avatar")?,
                    profile: row.try_get("user_profile")?,
                    role,
                }))
            }
            Self::Memory(store) => Ok(store.read().await.users.get(&user_id).cloned()),
        }
    }

    pub async fn get_picture(&self, picture_id: ResourceId) -> anyhow::Result<Option<Picture>> {
        match self {
            Self::Postgres(pool) => {
                let space_id = sqlx::query_scalar::<_, Option<i64>>(
                    r#"
                    SELECT space_id
                    FROM pictures
                    WHERE id = $1
                      AND is_delete = 0
                    "#,
                )
                .bind(picture_id.get())
                .fetch_optional(pool)
                .await
                .context("failed to query picture for edit session")?;

                Ok(space_id.map(|space_id| Picture {
                    id: picture_id,
                    workspace_id: space_id.map(WorkspaceId),
                }))
            }
            Self::Memory(store) => Ok(store.read().await.pictures.get(&picture_id).copied()),
        }
    }

    pub async fn get_workspace(
        &self,
        workspace_id: WorkspaceId,
    ) -> anyhow::Result<Option<Workspace>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query(
                    r#"
                    SELECT space_type, user_id
                    FROM spaces
                    WHERE id = $1
                      AND is_delete = 0
                    "#,
                )
                .bind(workspace_id.get())
                .fetch_optional(pool)
                .await
                .context("failed to query space for edit session")?;

                let Some(row) = row else {
                    return Ok(None);
                };
                let kind: i16 = row.try_get("space_type")?;
                let kind = WorkspaceKind::from_db_value(kind)
                    .ok_or_else(|| anyhow::anyhow!("invalid space type {kind} in database"))?;

                Ok(Some(Workspace { id: workspace_id, kind, owner_id: UserId(row.try_get("user_id")?) }))
            }
            Self::Memory(store) => Ok(store.read().await.workspaces.get(&workspace_id).copied()),
        }
    }

    async fn member_role(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
    ) -> anyhow::Result<Option<SpaceRole>> {
        match self {
            Self::Postgres(pool) => {
                let role = sqlx::query_scalar::<_, String>(
                    r#"
                    SELECT space_role
                    FROM space_users
                    WHERE space_id = $1
                      AND user_id = $2
                    "#,
                )
                .bind(workspace_id.get())
                .bind(user_id.get())
                .fetch_optional(pool)
                .await
                .context("failed to query space role for edit session")?
                .map(|role| {
                    SpaceRole::from_db_value(&role)
                        .ok_or_else(|| anyhow::anyhow!("invalid space role '{role}' in database"))
                })
                .transpose()?;

                Ok(role)
            }
            Self::Memory(store) => {
                Ok(store.read().await.members.get(&(workspace_id, user_id)).copied())
            }
        }
    }

    /// Permission set for `user` in the context of `workspace` (or the public gallery).
    pub async fn permissions(
        &self,
        workspace: Option<&Workspace>,
        user: &UserView,
    ) -> anyhow::Result<PermissionSet> {
        let member_role = match workspace {
            Some(workspace) if workspace.kind == WorkspaceKind::Team => {
                self.member_role(workspace.id, user.id).await?
            }
            _ => None,
        };

        Ok(resolve_permissions(workspace, user, member_role))
    }

    pub async fn insert_user(&self, user: UserView) {
        if let Self::Memory(store) = self {
            store.write().await.users.insert(user.id, user);
        }
    }

    pub async fn insert_picture(&self, picture: Picture) {
        if let Self::Memory(store) = self {
            store.write().await.pictures.insert(picture.id, picture);
        }
    }

    pub async fn insert_workspace(&self, workspace: Workspace) {
        if let Self::Memory(store) = self {
            store.write().await.workspaces.insert(workspace.id, workspace);
        }
    }

    pub async fn insert_member(&self, workspace_id: WorkspaceId, user_id: UserId, role: SpaceRole) {
        if let Self::Memory(store) = self {
            store.write().await.members.insert((workspace_id, user_id), role);
        }
    }
}
