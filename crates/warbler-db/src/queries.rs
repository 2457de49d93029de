use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::migrations::{DEFAULT_HEADER_IMAGE_URL, DEFAULT_IMAGE_URL};
use crate::models::{LikeRow, MessageRow, NewUser, UserRow, UserStatsRow, UserUpdate};
use crate::{Database, DbError, Result};

const USER_COLUMNS: &str =
    "u.id, u.email, u.username, u.image_url, u.header_image_url, u.bio, u.location, u.password";

// JOIN users to fetch author fields in the same query (no N+1)
const MESSAGE_SELECT: &str = "SELECT m.id, m.text, m.timestamp, m.user_id, u.username, u.image_url
     FROM messages m
     JOIN users u ON u.id = m.user_id";

impl Database {
    // -- Users --

    pub fn create_user(&self, new: &NewUser<'_>) -> Result<UserRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, email, password, image_url, header_image_url)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    new.username,
                    new.email,
                    new.password_hash,
                    new.image_url.unwrap_or(DEFAULT_IMAGE_URL),
                    DEFAULT_HEADER_IMAGE_URL,
                ],
            )?;
            let id = conn.last_insert_rowid();
            query_user_by_id(conn, id)?.ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.username = ?1");
            Ok(conn.query_row(&sql, [username], map_user).optional()?)
        })
    }

    /// All users, or those whose username contains `search` (case-insensitive).
    pub fn list_users(&self, search: Option<&str>) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users u
                 WHERE ?1 IS NULL OR instr(lower(u.username), lower(?1)) > 0
                 ORDER BY u.username"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([search], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_user(&self, id: i64, update: &UserUpdate<'_>) -> Result<UserRow> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users
                 SET username = ?1, email = ?2, image_url = ?3, header_image_url = ?4,
                     bio = ?5, location = ?6
                 WHERE id = ?7",
                params![
                    update.username,
                    update.email,
                    update.image_url.unwrap_or(DEFAULT_IMAGE_URL),
                    update.header_image_url.unwrap_or(DEFAULT_HEADER_IMAGE_URL),
                    update.bio,
                    update.location,
                    id,
                ],
            )?;
            query_user_by_id(conn, id)?.ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        })
    }

    /// Removes the user together with their messages, likes and follows.
    pub fn delete_user(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM users WHERE id = ?1", [id])? > 0))
    }

    pub fn user_stats(&self, id: i64) -> Result<UserStatsRow> {
        self.with_conn(|conn| {
            let stats = conn.query_row(
                "SELECT
                    (SELECT COUNT(*) FROM messages WHERE user_id = ?1),
                    (SELECT COUNT(*) FROM follows WHERE follower_id = ?1),
                    (SELECT COUNT(*) FROM follows WHERE followed_id = ?1),
                    (SELECT COUNT(*) FROM likes WHERE user_id = ?1)",
                [id],
                |row| {
                    Ok(UserStatsRow {
                        messages: row.get(0)?,
                        following: row.get(1)?,
                        followers: row.get(2)?,
                        likes: row.get(3)?,
                    })
                },
            )?;
            Ok(stats)
        })
    }

    // -- Follows --

    /// Returns false when the follow already existed.
    pub fn follow(&self, follower_id: i64, followed_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO follows (followed_id, follower_id) VALUES (?1, ?2)",
                params![followed_id, follower_id],
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn unfollow(&self, follower_id: i64, followed_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM follows WHERE followed_id = ?1 AND follower_id = ?2",
                params![followed_id, follower_id],
            )?;
            Ok(removed > 0)
        })
    }

    pub fn is_following(&self, follower_id: i64, followed_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM follows WHERE followed_id = ?1 AND follower_id = ?2)",
                params![followed_id, follower_id],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    pub fn is_followed_by(&self, user_id: i64, other_id: i64) -> Result<bool> {
        self.is_following(other_id, user_id)
    }

    /// Users that `user_id` follows.
    pub fn following(&self, user_id: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users u
                 JOIN follows f ON f.followed_id = u.id
                 WHERE f.follower_id = ?1
                 ORDER BY u.username"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Users that follow `user_id`.
    pub fn followers(&self, user_id: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {USER_COLUMNS} FROM users u
                 JOIN follows f ON f.follower_id = u.id
                 WHERE f.followed_id = ?1
                 ORDER BY u.username"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn following_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT followed_id FROM follows WHERE follower_id = ?1")?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    // -- Messages --

    pub fn create_message(&self, user_id: i64, text: &str) -> Result<MessageRow> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (text, user_id) VALUES (?1, ?2)",
                params![text, user_id],
            )?;
            let id = conn.last_insert_rowid();
            query_message(conn, id)?.ok_or(DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| query_message(conn, id))
    }

    pub fn messages_for_user(&self, user_id: i64, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT}
                 WHERE m.user_id = ?1
                 ORDER BY m.timestamp DESC, m.id DESC
                 LIMIT ?2"
            );
            query_messages(conn, &sql, params![user_id, limit])
        })
    }

    /// The home feed: the user's own messages plus those of everyone they follow.
    pub fn timeline(&self, user_id: i64, limit: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT}
                 WHERE m.user_id = ?1
                    OR m.user_id IN (SELECT followed_id FROM follows WHERE follower_id = ?1)
                 ORDER BY m.timestamp DESC, m.id DESC
                 LIMIT ?2"
            );
            query_messages(conn, &sql, params![user_id, limit])
        })
    }

    pub fn delete_message(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM messages WHERE id = ?1", [id])? > 0))
    }

    pub fn count_messages(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?))
    }

    // -- Likes --

    /// Inserts the like if absent. Returns false when it already existed.
    pub fn add_like(&self, user_id: i64, message_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO likes (user_id, message_id) VALUES (?1, ?2)",
                params![user_id, message_id],
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn remove_like(&self, user_id: i64, message_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM likes WHERE user_id = ?1 AND message_id = ?2",
                params![user_id, message_id],
            )?;
            Ok(removed > 0)
        })
    }

    /// Toggle a like: removes it if present, inserts it otherwise.
    /// Returns true when the like was added.
    pub fn toggle_like(&self, user_id: i64, message_id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM likes WHERE user_id = ?1 AND message_id = ?2",
                params![user_id, message_id],
            )?;
            if removed == 0 {
                tx.execute(
                    "INSERT INTO likes (user_id, message_id) VALUES (?1, ?2)",
                    params![user_id, message_id],
                )?;
            }
            tx.commit()?;
            Ok(removed == 0)
        })
    }

    pub fn likes_for_message(&self, message_id: i64) -> Result<Vec<LikeRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id, message_id FROM likes WHERE message_id = ?1")?;
            let rows = stmt
                .query_map([message_id], map_like)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn likes_by_user(&self, user_id: i64) -> Result<Vec<LikeRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id, message_id FROM likes WHERE user_id = ?1")?;
            let rows = stmt
                .query_map([user_id], map_like)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Messages the user has liked, newest first.
    pub fn liked_messages(&self, user_id: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{MESSAGE_SELECT}
                 JOIN likes l ON l.message_id = m.id
                 WHERE l.user_id = ?1
                 ORDER BY m.timestamp DESC, m.id DESC"
            );
            query_messages(conn, &sql, params![user_id])
        })
    }

    pub fn liked_message_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT message_id FROM likes WHERE user_id = ?1")?;
            let ids = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        image_url: row.get(3)?,
        header_image_url: row.get(4)?,
        bio: row.get(5)?,
        location: row.get(6)?,
        password: row.get(7)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        text: row.get(1)?,
        timestamp: row.get(2)?,
        user_id: row.get(3)?,
        author_username: row.get(4)?,
        author_image_url: row.get(5)?,
    })
}

fn map_like(row: &Row<'_>) -> rusqlite::Result<LikeRow> {
    Ok(LikeRow {
        user_id: row.get(0)?,
        message_id: row.get(1)?,
    })
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1");
    Ok(conn.query_row(&sql, [id], map_user).optional()?)
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
    Ok(conn.query_row(&sql, [id], map_message).optional()?)
}

fn query_messages(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn user(db: &Database, username: &str, email: &str) -> UserRow {
        db.create_user(&NewUser {
            username: Some(username),
            email: Some(email),
            password_hash: "$argon2id$stub",
            image_url: None,
        })
        .unwrap()
    }

    // -- Users --

    #[test]
    fn new_user_has_no_messages_or_followers() {
        let db = db();
        let u = user(&db, "testuser", "test@test.com");

        assert_eq!(db.user_stats(u.id).unwrap(), UserStatsRow::default());
        assert!(db.followers(u.id).unwrap().is_empty());
        assert_eq!(u.image_url, DEFAULT_IMAGE_URL);
        assert_eq!(u.header_image_url, DEFAULT_HEADER_IMAGE_URL);
    }

    #[test]
    fn null_username_is_an_integrity_error() {
        let db = db();
        let err = db
            .create_user(&NewUser {
                username: None,
                email: Some("test@email.com"),
                password_hash: "$argon2id$stub",
                image_url: None,
            })
            .unwrap_err();
        assert!(err.is_integrity(), "unexpected error: {err}");
    }

    #[test]
    fn duplicate_username_or_email_is_an_integrity_error() {
        let db = db();
        user(&db, "Tink", "tink@bell.com");

        let same_name = db.create_user(&NewUser {
            username: Some("Tink"),
            email: Some("other@bell.com"),
            password_hash: "$argon2id$stub",
            image_url: None,
        });
        assert!(matches!(same_name, Err(DbError::Integrity(_))));

        let same_email = db.create_user(&NewUser {
            username: Some("Peter"),
            email: Some("tink@bell.com"),
            password_hash: "$argon2id$stub",
            image_url: None,
        });
        assert!(matches!(same_email, Err(DbError::Integrity(_))));
    }

    #[test]
    fn search_matches_username_substrings() {
        let db = db();
        user(&db, "Tink", "tink@bell.com");
        user(&db, "Tinker", "tinker@bell.com");
        user(&db, "Hook", "hook@ship.com");

        let names: Vec<_> = db
            .list_users(Some("tink"))
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, vec!["Tink", "Tinker"]);
        assert_eq!(db.list_users(None).unwrap().len(), 3);
    }

    #[test]
    fn update_user_rewrites_profile_fields() {
        let db = db();
        let u = user(&db, "Tink", "tink@bell.com");

        let updated = db
            .update_user(
                u.id,
                &UserUpdate {
                    username: "Tinkerbell",
                    email: "tink@bell.com",
                    image_url: Some("/pic.png"),
                    header_image_url: None,
                    bio: Some("fairy"),
                    location: Some("Neverland"),
                },
            )
            .unwrap();

        assert_eq!(updated.username, "Tinkerbell");
        assert_eq!(updated.image_url, "/pic.png");
        assert_eq!(updated.header_image_url, DEFAULT_HEADER_IMAGE_URL);
        assert_eq!(updated.bio.as_deref(), Some("fairy"));
        assert_eq!(updated.password, u.password);
    }

    #[test]
    fn deleting_a_user_cascades() {
        let db = db();
        let u1 = user(&db, "u1", "u1@test.com");
        let u2 = user(&db, "u2", "u2@test.com");
        let m = db.create_message(u1.id, "bye").unwrap();
        db.add_like(u2.id, m.id).unwrap();
        db.follow(u2.id, u1.id).unwrap();

        assert!(db.delete_user(u1.id).unwrap());

        assert!(db.get_message(m.id).unwrap().is_none());
        assert!(db.likes_by_user(u2.id).unwrap().is_empty());
        assert!(db.following(u2.id).unwrap().is_empty());
    }

    // -- Follows --

    #[test]
    fn follows_are_one_directional() {
        let db = db();
        let u1 = user(&db, "test", "test@test.com");
        let u2 = user(&db, "test2", "test@test2.com");

        assert!(db.follow(u1.id, u2.id).unwrap());

        assert_eq!(db.following(u2.id).unwrap().len(), 0);
        assert_eq!(db.followers(u2.id).unwrap().len(), 1);
        assert_eq!(db.followers(u1.id).unwrap().len(), 0);
        assert_eq!(db.following(u1.id).unwrap().len(), 1);

        assert_eq!(db.followers(u2.id).unwrap()[0].id, u1.id);
        assert_eq!(db.following(u1.id).unwrap()[0].id, u2.id);

        assert!(db.is_following(u1.id, u2.id).unwrap());
        assert!(!db.is_following(u2.id, u1.id).unwrap());
        assert!(db.is_followed_by(u2.id, u1.id).unwrap());
    }

    #[test]
    fn following_twice_keeps_one_row() {
        let db = db();
        let u1 = user(&db, "a", "a@test.com");
        let u2 = user(&db, "b", "b@test.com");

        assert!(db.follow(u1.id, u2.id).unwrap());
        assert!(!db.follow(u1.id, u2.id).unwrap());
        assert_eq!(db.user_stats(u2.id).unwrap().followers, 1);

        assert!(db.unfollow(u1.id, u2.id).unwrap());
        assert!(!db.unfollow(u1.id, u2.id).unwrap());
        assert!(!db.is_following(u1.id, u2.id).unwrap());
    }

    #[test]
    fn following_a_missing_user_is_an_integrity_error() {
        let db = db();
        let u1 = user(&db, "a", "a@test.com");
        assert!(db.follow(u1.id, 4242).unwrap_err().is_integrity());
    }

    // -- Messages --

    #[test]
    fn creating_a_message_adds_to_owner() {
        let db = db();
        let u = user(&db, "testname", "test@test.com");

        let m = db.create_message(u.id, "Test Message").unwrap();

        let messages = db.messages_for_user(u.id, 100).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "Test Message");
        assert_eq!(messages[0].id, m.id);
        assert_eq!(m.author_username, "testname");
        assert_eq!(db.user_stats(u.id).unwrap().messages, 1);
    }

    #[test]
    fn message_requires_an_existing_owner() {
        let db = db();
        let err = db.create_message(988, "orphan").unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn timeline_holds_own_and_followed_messages() {
        let db = db();
        let me = user(&db, "me", "me@test.com");
        let friend = user(&db, "friend", "friend@test.com");
        let stranger = user(&db, "stranger", "stranger@test.com");
        db.follow(me.id, friend.id).unwrap();

        db.create_message(me.id, "mine").unwrap();
        db.create_message(friend.id, "theirs").unwrap();
        db.create_message(stranger.id, "noise").unwrap();

        let texts: Vec<_> = db
            .timeline(me.id, 100)
            .unwrap()
            .into_iter()
            .map(|m| m.text)
            .collect();
        assert_eq!(texts, vec!["theirs", "mine"]);
    }

    #[test]
    fn deleting_a_message_removes_its_likes() {
        let db = db();
        let u1 = user(&db, "u1", "u1@test.com");
        let u2 = user(&db, "u2", "u2@test.com");
        let m = db.create_message(u1.id, "Delete Me").unwrap();
        db.add_like(u2.id, m.id).unwrap();

        assert!(db.delete_message(m.id).unwrap());
        assert!(!db.delete_message(m.id).unwrap());

        assert!(db.likes_for_message(m.id).unwrap().is_empty());
        assert_eq!(db.count_messages().unwrap(), 0);
    }

    // -- Likes --

    #[test]
    fn liking_inserts_one_row() {
        let db = db();
        let u = user(&db, "testname", "test@test.com");
        let m = db.create_message(u.id, "Message Test").unwrap();

        assert!(db.add_like(u.id, m.id).unwrap());
        assert!(!db.add_like(u.id, m.id).unwrap());

        let likes = db.likes_by_user(u.id).unwrap();
        assert_eq!(likes, vec![LikeRow { user_id: u.id, message_id: m.id }]);
        assert_eq!(db.liked_message_ids(u.id).unwrap(), vec![m.id]);
        assert_eq!(db.liked_messages(u.id).unwrap()[0].text, "Message Test");
    }

    #[test]
    fn toggle_like_flips_state() {
        let db = db();
        let u1 = user(&db, "u1", "u1@test.com");
        let u2 = user(&db, "u2", "u2@test.com");
        let m = db.create_message(u1.id, "The earth is round").unwrap();

        assert!(db.toggle_like(u2.id, m.id).unwrap());
        assert_eq!(db.likes_for_message(m.id).unwrap().len(), 1);

        assert!(!db.toggle_like(u2.id, m.id).unwrap());
        assert!(db.likes_for_message(m.id).unwrap().is_empty());

        assert!(db.remove_like(u2.id, m.id).is_ok_and(|removed| !removed));
    }
}
