use bitflags::bitflags;

use super::models::{Guild, Member, PermissionOverwrite, Role};

bitflags! {
    /// Discord permission bitfield (the subset the bot inspects).
    /// Serialized by Discord as a decimal string.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Permissions: u64 {
        const CREATE_INSTANT_INVITE = 1 << 0;
        const KICK_MEMBERS          = 1 << 1;
        const BAN_MEMBERS           = 1 << 2;
        const ADMINISTRATOR         = 1 << 3;
        const MANAGE_CHANNELS       = 1 << 4;
        const MANAGE_GUILD          = 1 << 5;
        const ADD_REACTIONS         = 1 << 6;
        const VIEW_AUDIT_LOG        = 1 << 7;
        const VIEW_CHANNEL          = 1 << 10;
        const SEND_MESSAGES         = 1 << 11;
        const MANAGE_MESSAGES       = 1 << 13;
        const READ_MESSAGE_HISTORY  = 1 << 16;
        const MANAGE_ROLES          = 1 << 28;
        const MANAGE_THREADS        = 1 << 34;
    }
}

/// Everything needed to read a channel's back-history.
pub const READ_HISTORY: Permissions =
    Permissions::VIEW_CHANNEL.union(Permissions::READ_MESSAGE_HISTORY);

/// Parse Discord's decimal-string bitfield, dropping unknown bits.
pub fn parse_permissions(raw: &str) -> Permissions {
    Permissions::from_bits_truncate(raw.trim().parse::<u64>().unwrap_or(0))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverwriteTarget {
    Role,
    Member,
}

impl OverwriteTarget {
    fn of(overwrite: &PermissionOverwrite) -> Self {
        if overwrite.kind == 1 {
            Self::Member
        } else {
            Self::Role
        }
    }
}

/// A member's role-derived standing in a guild, resolved once and reused for
/// every channel check during a scan or kick job.
#[derive(Debug, Clone)]
pub struct MemberPermissions {
    pub user_id: String,
    /// The `@everyone` role shares the guild's id.
    pub everyone_role_id: String,
    pub everyone: Permissions,
    pub role_permissions: Vec<(String, Permissions)>,
    pub is_owner: bool,
    /// Position of the member's highest role (0 = only `@everyone`).
    pub top_position: i32,
}

impl MemberPermissions {
    pub fn resolve(guild: &Guild, roles: &[Role], member: &Member) -> Self {
        let everyone = roles
            .iter()
            .find(|r| r.id == guild.id)
            .map(|r| parse_permissions(&r.permissions))
            .unwrap_or(Permissions::empty());

        let held: Vec<&Role> = roles
            .iter()
            .filter(|r| r.id != guild.id && member.roles.contains(&r.id))
            .collect();

        Self {
            user_id: member.user.id.clone(),
            everyone_role_id: guild.id.clone(),
            everyone,
            role_permissions: held
                .iter()
                .map(|r| (r.id.clone(), parse_permissions(&r.permissions)))
                .collect(),
            is_owner: !guild.owner_id.is_empty() && guild.owner_id == member.user.id,
            top_position: held.iter().map(|r| r.position).max().unwrap_or(0),
        }
    }

    /// Guild-wide permissions, before channel overwrites.
    pub fn guild_level(&self) -> Permissions {
        compute_effective_permissions(
            self.everyone,
            &self.role_permissions,
            &[],
            &self.everyone_role_id,
            &self.user_id,
            self.is_owner,
        )
    }

    /// Permissions in a channel carrying the given overwrites.
    pub fn in_channel(&self, overwrites: &[PermissionOverwrite]) -> Permissions {
        compute_effective_permissions(
            self.everyone,
            &self.role_permissions,
            overwrites,
            &self.everyone_role_id,
            &self.user_id,
            self.is_owner,
        )
    }

    /// Role hierarchy check used for kicks: the owner can never be acted on,
    /// and otherwise the actor's highest role must sit strictly above the target's.
    pub fn outranks(&self, target: &MemberPermissions) -> bool {
        if target.is_owner || target.user_id == self.user_id {
            return false;
        }
        self.is_owner || self.top_position > target.top_position
    }
}

/// Compute a member's effective permissions in a channel.
///
/// Algorithm (Discord's documented order):
///   1. Guild owner gets all permissions unconditionally.
///   2. Start with `@everyone` role's base permissions.
///   3. OR in all the member's role permissions.
///   4. If ADMINISTRATOR is set, return all permissions.
///   5. Apply channel overwrite for `@everyone`.
///   6. AND NOT all role denies, then OR all role allows.
///   7. Apply member-specific overwrite.
///
/// At every level the deny is applied before the allow, so an allow on one
/// of the member's roles beats a deny on another.
pub fn compute_effective_permissions(
    base_everyone: Permissions,
    member_role_permissions: &[(String, Permissions)],
    overwrites: &[PermissionOverwrite],
    everyone_role_id: &str,
    user_id: &str,
    is_owner: bool,
) -> Permissions {
    if is_owner {
        return Permissions::all();
    }

    let mut perms = base_everyone;
    for (_role_id, role_perms) in member_role_permissions {
        perms |= *role_perms;
    }

    if perms.contains(Permissions::ADMINISTRATOR) {
        return Permissions::all();
    }

    if overwrites.is_empty() {
        return perms;
    }

    for ov in overwrites {
        if OverwriteTarget::of(ov) == OverwriteTarget::Role && ov.id == everyone_role_id {
            perms &= !parse_permissions(&ov.deny);
            perms |= parse_permissions(&ov.allow);
        }
    }

    let mut role_allow = Permissions::empty();
    let mut role_deny = Permissions::empty();
    for ov in overwrites {
        if OverwriteTarget::of(ov) == OverwriteTarget::Role
            && ov.id != everyone_role_id
            && member_role_permissions.iter().any(|(id, _)| *id == ov.id)
        {
            role_allow |= parse_permissions(&ov.allow);
            role_deny |= parse_permissions(&ov.deny);
        }
    }
    perms &= !role_deny;
    perms |= role_allow;

    for ov in overwrites {
        if OverwriteTarget::of(ov) == OverwriteTarget::Member && ov.id == user_id {
            perms &= !parse_permissions(&ov.deny);
            perms |= parse_permissions(&ov.allow);
        }
    }

    perms
}
