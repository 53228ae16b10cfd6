//! User accounts and profile operations.

use crate::session::Session;
use bytes::{Buf, BufMut};
use interlock_common::{
    Id, InterlockError, MailAddr, Password, RealName, Result, StorageConfig, Username,
};
use interlock_storage::{BPlusTree, Record};
use std::fmt;

/// A user account row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserInfo {
    pub password: Password,
    pub name: RealName,
    pub mail: MailAddr,
    pub privilege: i32,
}

impl Record for UserInfo {
    const SIZE: usize = Password::SIZE + RealName::SIZE + MailAddr::SIZE + 4;

    fn encode(&self, buf: &mut impl BufMut) {
        self.password.encode(buf);
        self.name.encode(buf);
        self.mail.encode(buf);
        buf.put_i32_le(self.privilege);
    }

    fn decode(buf: &mut impl Buf) -> Self {
        Self {
            password: Password::decode(buf),
            name: RealName::decode(buf),
            mail: MailAddr::decode(buf),
            privilege: buf.get_i32_le(),
        }
    }
}

/// What `query_profile` / `modify_profile` print.
#[derive(Debug, Clone)]
pub struct ProfileView {
    pub username: Username,
    pub name: RealName,
    pub mail: MailAddr,
    pub privilege: i32,
}

impl fmt::Display for ProfileView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.username, self.name, self.mail, self.privilege
        )
    }
}

/// Durable user table plus the in-memory session layer.
pub struct UserDirectory {
    users: BPlusTree<Id, UserInfo>,
    pub session: Session,
}

impl UserDirectory {
    pub fn open(config: &StorageConfig) -> Result<Self> {
        Ok(Self {
            users: BPlusTree::open(config, "users")?,
            session: Session::new(),
        })
    }

    /// Creates an account. The very first account is granted privilege
    /// 10 regardless of input; afterwards the caller must be logged in
    /// with strictly higher privilege than the new account's.
    pub fn add_user(
        &mut self,
        cur: &Username,
        user: &Username,
        password: Password,
        name: RealName,
        mail: MailAddr,
        privilege: i32,
    ) -> Result<()> {
        let mut privilege = privilege;
        if self.users.is_empty()? {
            privilege = 10;
        } else {
            let cur_privilege = self
                .session
                .privilege(cur.id())
                .ok_or(InterlockError::NotLoggedIn)?;
            if cur_privilege <= privilege {
                return Err(InterlockError::Unauthorized);
            }
        }
        self.users.insert(
            user.id(),
            &UserInfo {
                password,
                name,
                mail,
                privilege,
            },
        )?;
        Ok(())
    }

    pub fn login(&mut self, user: &Username, password: &Password) -> Result<()> {
        let uid = user.id();
        if self.session.is_logged_in(uid) {
            return Err(InterlockError::AlreadyExists);
        }
        let info = self.users.get(&uid)?;
        if info.password != *password {
            return Err(InterlockError::Unauthorized);
        }
        self.session.login(uid, info.privilege);
        Ok(())
    }

    pub fn logout(&mut self, user: &Username) -> Result<()> {
        if !self.session.logout(user.id()) {
            return Err(InterlockError::NotLoggedIn);
        }
        Ok(())
    }

    /// Profile of `user`, visible to `user` itself or to any logged-in
    /// caller with strictly higher privilege.
    pub fn query_profile(&mut self, cur: &Username, user: &Username) -> Result<ProfileView> {
        let cur_uid = cur.id();
        let uid = user.id();
        let cur_privilege = self
            .session
            .privilege(cur_uid)
            .ok_or(InterlockError::NotLoggedIn)?;
        let info = self.users.get(&uid)?;
        if uid != cur_uid && cur_privilege <= info.privilege {
            return Err(InterlockError::Unauthorized);
        }
        Ok(ProfileView {
            username: *user,
            name: info.name,
            mail: info.mail,
            privilege: info.privilege,
        })
    }

    /// Updates any subset of a profile's fields. Raising a privilege to
    /// the caller's level or above is rejected.
    pub fn modify_profile(
        &mut self,
        cur: &Username,
        user: &Username,
        password: Option<Password>,
        name: Option<RealName>,
        mail: Option<MailAddr>,
        privilege: Option<i32>,
    ) -> Result<ProfileView> {
        let cur_uid = cur.id();
        let uid = user.id();
        let cur_privilege = self
            .session
            .privilege(cur_uid)
            .ok_or(InterlockError::NotLoggedIn)?;
        let handle = self.users.find(&uid)?.ok_or(InterlockError::NotFound)?;
        let mut info = self.users.get_by_handle(handle)?;
        if privilege.is_some_and(|g| cur_privilege <= g)
            || (uid != cur_uid && cur_privilege <= info.privilege)
        {
            return Err(InterlockError::Unauthorized);
        }
        if let Some(password) = password {
            info.password = password;
        }
        if let Some(name) = name {
            info.name = name;
        }
        if let Some(mail) = mail {
            info.mail = mail;
        }
        if let Some(privilege) = privilege {
            info.privilege = privilege;
        }
        self.users.set_by_handle(handle, &info)?;
        Ok(ProfileView {
            username: *user,
            name: info.name,
            mail: info.mail,
            privilege: info.privilege,
        })
    }

    /// Truncates the user table and logs everyone out.
    pub fn clean(&mut self) -> Result<()> {
        self.users.clear()?;
        self.session.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interlock_common::FixedStr;
    use tempfile::tempdir;

    fn user(s: &str) -> Username {
        FixedStr::parse(s).unwrap()
    }

    fn pwd(s: &str) -> Password {
        FixedStr::parse(s).unwrap()
    }

    fn open_dir(dir: &tempfile::TempDir) -> UserDirectory {
        UserDirectory::open(&StorageConfig::at(dir.path())).unwrap()
    }

    fn seed_root(users: &mut UserDirectory) {
        users
            .add_user(
                &user("ignored"),
                &user("root"),
                pwd("rootpw"),
                FixedStr::parse("Root").unwrap(),
                FixedStr::parse("root@x.com").unwrap(),
                0,
            )
            .unwrap();
        users.login(&user("root"), &pwd("rootpw")).unwrap();
    }

    #[test]
    fn test_first_user_gets_privilege_10() {
        let dir = tempdir().unwrap();
        let mut users = open_dir(&dir);
        seed_root(&mut users);
        let view = users.query_profile(&user("root"), &user("root")).unwrap();
        assert_eq!(view.privilege, 10);
        assert_eq!(view.to_string(), "root Root root@x.com 10");
    }

    #[test]
    fn test_add_user_requires_higher_privilege() {
        let dir = tempdir().unwrap();
        let mut users = open_dir(&dir);
        seed_root(&mut users);
        users
            .add_user(
                &user("root"),
                &user("alice"),
                pwd("pw"),
                FixedStr::parse("Alice").unwrap(),
                FixedStr::parse("a@x.com").unwrap(),
                5,
            )
            .unwrap();
        // Equal-or-higher target privilege is rejected.
        assert!(matches!(
            users.add_user(
                &user("root"),
                &user("bob"),
                pwd("pw"),
                FixedStr::parse("Bob").unwrap(),
                FixedStr::parse("b@x.com").unwrap(),
                10,
            ),
            Err(InterlockError::Unauthorized)
        ));
        // Duplicate user name is rejected.
        assert!(users
            .add_user(
                &user("root"),
                &user("alice"),
                pwd("pw"),
                FixedStr::parse("Alice").unwrap(),
                FixedStr::parse("a@x.com").unwrap(),
                3,
            )
            .is_err());
    }

    #[test]
    fn test_login_rules() {
        let dir = tempdir().unwrap();
        let mut users = open_dir(&dir);
        seed_root(&mut users);
        // Double login fails.
        assert!(users.login(&user("root"), &pwd("rootpw")).is_err());
        users.logout(&user("root")).unwrap();
        // Wrong password fails.
        assert!(users.login(&user("root"), &pwd("nope")).is_err());
        // Unknown user fails.
        assert!(users.login(&user("ghost"), &pwd("pw")).is_err());
        // Logout without a session fails.
        assert!(users.logout(&user("root")).is_err());
    }

    #[test]
    fn test_profile_visibility() {
        let dir = tempdir().unwrap();
        let mut users = open_dir(&dir);
        seed_root(&mut users);
        users
            .add_user(
                &user("root"),
                &user("alice"),
                pwd("pw"),
                FixedStr::parse("Alice").unwrap(),
                FixedStr::parse("a@x.com").unwrap(),
                5,
            )
            .unwrap();
        users.login(&user("alice"), &pwd("pw")).unwrap();

        // Self query always works; peers at or above are hidden.
        assert!(users.query_profile(&user("alice"), &user("alice")).is_ok());
        assert!(matches!(
            users.query_profile(&user("alice"), &user("root")),
            Err(InterlockError::Unauthorized)
        ));
        assert!(users.query_profile(&user("root"), &user("alice")).is_ok());
    }

    #[test]
    fn test_modify_profile_rules() {
        let dir = tempdir().unwrap();
        let mut users = open_dir(&dir);
        seed_root(&mut users);
        users
            .add_user(
                &user("root"),
                &user("alice"),
                pwd("pw"),
                FixedStr::parse("Alice").unwrap(),
                FixedStr::parse("a@x.com").unwrap(),
                5,
            )
            .unwrap();

        // Raising privilege to the caller's level is rejected.
        assert!(matches!(
            users.modify_profile(&user("root"), &user("alice"), None, None, None, Some(10)),
            Err(InterlockError::Unauthorized)
        ));

        let view = users
            .modify_profile(
                &user("root"),
                &user("alice"),
                None,
                None,
                Some(FixedStr::parse("new@x.com").unwrap()),
                Some(7),
            )
            .unwrap();
        assert_eq!(view.to_string(), "alice Alice new@x.com 7");

        // Privilege cached in an existing session is unchanged until the
        // next login.
        users.login(&user("alice"), &pwd("pw")).unwrap();
        assert_eq!(users.session.privilege(user("alice").id()), Some(7));
    }

    #[test]
    fn test_users_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut users = open_dir(&dir);
            seed_root(&mut users);
        }
        let mut users = open_dir(&dir);
        // Session is gone, the account is not.
        assert!(users.query_profile(&user("root"), &user("root")).is_err());
        users.login(&user("root"), &pwd("rootpw")).unwrap();
        assert!(users.query_profile(&user("root"), &user("root")).is_ok());
    }
}
