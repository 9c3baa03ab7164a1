use anyhow::{Context, Result};
use reviewbot_core::{
    config::DbConfig,
    models::{
        AccountType, Installation, NewInstallation, NewReview, Review, ReviewKey, ReviewOutcome,
        ReviewStatus,
    },
};
use sqlx::{
    Pool, Sqlite, SqlitePool,
    migrate::MigrateDatabase,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use time::OffsetDateTime;

#[derive(Clone)]
pub struct Database {
    pub pool: Pool<Sqlite>,
}

/// Result of a worker trying to take ownership of a review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// The review is now PROCESSING.
    Claimed(Review),
    /// The review already reached a final state; nothing to do.
    Final(Review),
    Missing,
}

macro_rules! installation_columns {
    () => {
        "id, installation_id, user_id, account_login, account_type, installed_at, suspended_at"
    };
}

macro_rules! review_columns {
    () => {
        "id, installation_id, repo_owner, repo_name, pr_number, pr_title, pr_url, head_sha, \
         status, content, summary, files_reviewed, error_message, github_comment_id, \
         created_at, updated_at"
    };
}

#[derive(sqlx::FromRow)]
struct InstallationRow {
    id: i64,
    installation_id: i64,
    user_id: Option<String>,
    account_login: String,
    account_type: String,
    installed_at: OffsetDateTime,
    suspended_at: Option<OffsetDateTime>,
}

impl From<InstallationRow> for Installation {
    fn from(row: InstallationRow) -> Self {
        Self {
            id: row.id,
            installation_id: row.installation_id as u64,
            user_id: row.user_id,
            account_login: row.account_login,
            account_type: AccountType::from_github(Some(&row.account_type)),
            installed_at: row.installed_at,
            suspended_at: row.suspended_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: i64,
    installation_id: i64,
    repo_owner: String,
    repo_name: String,
    pr_number: i64,
    pr_title: String,
    pr_url: String,
    head_sha: String,
    status: String,
    content: Option<String>,
    summary: Option<String>,
    files_reviewed: i64,
    error_message: Option<String>,
    github_comment_id: Option<i64>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<ReviewRow> for Review {
    type Error = anyhow::Error;

    fn try_from(row: ReviewRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            installation_id: row.installation_id,
            key: ReviewKey {
                owner: row.repo_owner,
                repo: row.repo_name,
                pr_number: row.pr_number as u64,
                head_sha: row.head_sha,
            },
            pr_title: row.pr_title,
            pr_url: row.pr_url,
            status: row.status.parse()?,
            content: row.content,
            summary: row.summary,
            files_reviewed: row.files_reviewed as u32,
            error_message: row.error_message,
            github_comment_id: row.github_comment_id.map(|id| id as u64),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl Database {
    pub async fn new(config: &DbConfig) -> Result<Self> {
        if !Sqlite::database_exists(&config.url).await.unwrap_or(false) {
            tracing::info!(url = %config.url, "Creating database");
            Sqlite::create_database(&config.url).await.context("Failed to create database")?;
            tracing::info!("Database created");
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .context("Failed to connect to database")?;
        Self::from_pool(pool).await
    }

    /// Private in-memory database, used by tests across the workspace.
    pub async fn in_memory() -> Result<Self> {
        // Every connection to :memory: is a separate database, so pin the pool to one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await
            .context("Failed to open in-memory database")?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;
        Ok(Self { pool })
    }

    pub async fn close(&self) { self.pool.close().await }

    /// Create the installation, or reactivate and update an existing one.
    ///
    /// An empty account login or missing user id never overwrites stored values.
    pub async fn upsert_installation(&self, new: &NewInstallation) -> Result<Installation> {
        let mut conn = self.pool.acquire().await?;
        let installation_id = new.installation_id as i64;
        let now = OffsetDateTime::now_utc();
        let row = sqlx::query_as::<_, InstallationRow>(concat!(
            r#"
            INSERT INTO installations
                (installation_id, user_id, account_login, account_type, installed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (installation_id) DO UPDATE
            SET user_id = COALESCE(excluded.user_id, installations.user_id),
                account_login = CASE WHEN excluded.account_login = ''
                    THEN installations.account_login ELSE excluded.account_login END,
                account_type = CASE WHEN excluded.account_login = ''
                    THEN installations.account_type ELSE excluded.account_type END,
                suspended_at = NULL
            RETURNING "#,
            installation_columns!()
        ))
        .bind(installation_id)
        .bind(&new.user_id)
        .bind(&new.account_login)
        .bind(new.account_type.as_str())
        .bind(now)
        .fetch_one(&mut *conn)
        .await?;
        Ok(row.into())
    }

    /// Soft-suspend every row for the installation. Returns the number of rows touched.
    pub async fn suspend_installation(&self, installation_id: u64) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let installation_id = installation_id as i64;
        let count = sqlx::query(
            r#"
            UPDATE installations
            SET suspended_at = ?
            WHERE installation_id = ?
            "#,
        )
        .bind(OffsetDateTime::now_utc())
        .bind(installation_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
        Ok(count)
    }

    pub async fn unsuspend_installation(&self, installation_id: u64) -> Result<u64> {
        let mut conn = self.pool.acquire().await?;
        let installation_id = installation_id as i64;
        let count = sqlx::query(
            r#"
            UPDATE installations
            SET suspended_at = NULL
            WHERE installation_id = ?
            "#,
        )
        .bind(installation_id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
        Ok(count)
    }

    pub async fn get_installation(&self, installation_id: u64) -> Result<Option<Installation>> {
        let mut conn = self.pool.acquire().await?;
        let installation_id = installation_id as i64;
        let row = sqlx::query_as::<_, InstallationRow>(concat!(
            "SELECT ",
            installation_columns!(),
            " FROM installations WHERE installation_id = ?"
        ))
        .bind(installation_id)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.map(Installation::from))
    }

    pub async fn find_review(&self, key: &ReviewKey) -> Result<Option<Review>> {
        let mut conn = self.pool.acquire().await?;
        let pr_number = key.pr_number as i64;
        sqlx::query_as::<_, ReviewRow>(concat!(
            "SELECT ",
            review_columns!(),
            r#"
            FROM reviews
            WHERE repo_owner = ? AND repo_name = ? AND pr_number = ? AND head_sha = ?
            "#
        ))
        .bind(&key.owner)
        .bind(&key.repo)
        .bind(pr_number)
        .bind(&key.head_sha)
        .fetch_optional(&mut *conn)
        .await?
        .map(Review::try_from)
        .transpose()
    }

    pub async fn get_review(&self, id: i64) -> Result<Option<Review>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query_as::<_, ReviewRow>(concat!(
            "SELECT ",
            review_columns!(),
            " FROM reviews WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .map(Review::try_from)
        .transpose()
    }

    /// Insert a PENDING review unless one already exists for the natural key.
    ///
    /// Returns the review id and whether this call created it. The unique index on
    /// the natural key decides races between concurrent deliveries.
    pub async fn create_review(&self, new: &NewReview) -> Result<(i64, bool)> {
        let now = OffsetDateTime::now_utc();
        let pr_number = new.key.pr_number as i64;
        let inserted = {
            let mut conn = self.pool.acquire().await?;
            sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO reviews (installation_id, repo_owner, repo_name, pr_number, pr_title,
                                     pr_url, head_sha, status, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, 'PENDING', ?, ?)
                ON CONFLICT (repo_owner, repo_name, pr_number, head_sha) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(new.installation_id)
            .bind(&new.key.owner)
            .bind(&new.key.repo)
            .bind(pr_number)
            .bind(&new.pr_title)
            .bind(&new.pr_url)
            .bind(&new.key.head_sha)
            .bind(now)
            .bind(now)
            .fetch_optional(&mut *conn)
            .await?
        };
        if let Some(id) = inserted {
            return Ok((id, true));
        }
        let existing = self
            .find_review(&new.key)
            .await?
            .with_context(|| format!("Review {} vanished after conflict", new.key))?;
        Ok((existing.id, false))
    }

    /// Move a review into PROCESSING on job receipt.
    ///
    /// PENDING, PROCESSING (duplicate delivery) and FAILED (redelivery) rows can be
    /// claimed; COMPLETED and SKIPPED rows are returned untouched.
    pub async fn claim_review(&self, id: i64) -> Result<Claim> {
        let row = {
            let mut conn = self.pool.acquire().await?;
            let query = format!(
                r#"
                UPDATE reviews
                SET status = ?, error_message = NULL, updated_at = ?
                WHERE id = ? AND status IN ({})
                RETURNING {}
                "#,
                status_sources(ReviewStatus::Processing),
                review_columns!()
            );
            sqlx::query_as::<_, ReviewRow>(&query)
                .bind(ReviewStatus::Processing.as_str())
                .bind(OffsetDateTime::now_utc())
                .bind(id)
                .fetch_optional(&mut *conn)
                .await?
        };
        if let Some(row) = row {
            return Ok(Claim::Claimed(row.try_into()?));
        }
        Ok(match self.get_review(id).await? {
            Some(review) => Claim::Final(review),
            None => Claim::Missing,
        })
    }

    /// Record the outcome of a claimed review.
    ///
    /// The last delivery to finish wins: a COMPLETED or SKIPPED outcome replaces a FAILED
    /// one written by a concurrent duplicate. Returns `false` when the row had already
    /// reached a final state, in which case nothing is written.
    pub async fn finish_review(&self, id: i64, outcome: &ReviewOutcome) -> Result<bool> {
        let (content, summary, files_reviewed, error_message, comment_id) = match outcome {
            ReviewOutcome::Completed { content, summary, files_reviewed, comment_id } => (
                Some(content.as_str()),
                Some(summary.as_str()),
                *files_reviewed as i64,
                None,
                Some(*comment_id as i64),
            ),
            ReviewOutcome::Skipped { summary } => (None, Some(summary.as_str()), 0, None, None),
            ReviewOutcome::Failed { message } => (None, None, 0, Some(message.as_str()), None),
        };
        let query = format!(
            r#"
            UPDATE reviews
            SET status = ?, content = ?, summary = ?, files_reviewed = ?, error_message = ?,
                github_comment_id = ?, updated_at = ?
            WHERE id = ? AND status IN ({})
            "#,
            status_sources(outcome.status())
        );
        let mut conn = self.pool.acquire().await?;
        let count = sqlx::query(&query)
            .bind(outcome.status().as_str())
            .bind(content)
            .bind(summary)
            .bind(files_reviewed)
            .bind(error_message)
            .bind(comment_id)
            .bind(OffsetDateTime::now_utc())
            .bind(id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        if count == 0 {
            tracing::warn!("Review {} is already final, dropping {} outcome", id, outcome.status());
        }
        Ok(count > 0)
    }
}

/// SQL list of the states a review may leave to enter `next`.
fn status_sources(next: ReviewStatus) -> String {
    ReviewStatus::sources(next)
        .map(|status| format!("'{}'", status.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use reviewbot_core::models::{
        AccountType, NewInstallation, NewReview, ReviewKey, ReviewOutcome, ReviewStatus,
    };

    use super::{Claim, Database};

    fn new_installation(installation_id: u64) -> NewInstallation {
        NewInstallation {
            installation_id,
            user_id: None,
            account_login: "octo-org".to_string(),
            account_type: AccountType::Organization,
        }
    }

    fn new_review(installation_id: i64, head_sha: &str) -> NewReview {
        NewReview {
            installation_id,
            key: ReviewKey {
                owner: "octo-org".to_string(),
                repo: "widgets".to_string(),
                pr_number: 7,
                head_sha: head_sha.to_string(),
            },
            pr_title: "Add widgets".to_string(),
            pr_url: "https://github.com/octo-org/widgets/pull/7".to_string(),
        }
    }

    #[tokio::test]
    async fn test_installation_lifecycle() {
        let db = Database::in_memory().await.unwrap();
        let created = db.upsert_installation(&new_installation(42)).await.unwrap();
        assert!(created.is_active());
        assert_eq!(created.account_login, "octo-org");
        assert_eq!(created.account_type, AccountType::Organization);

        assert_eq!(db.suspend_installation(42).await.unwrap(), 1);
        assert!(!db.get_installation(42).await.unwrap().unwrap().is_active());
        assert_eq!(db.suspend_installation(43).await.unwrap(), 0);

        // Reinstall clears the suspension without creating a second row
        let again = db.upsert_installation(&new_installation(42)).await.unwrap();
        assert_eq!(again.id, created.id);
        assert!(again.is_active());
    }

    #[tokio::test]
    async fn test_installation_claim_keeps_login() {
        let db = Database::in_memory().await.unwrap();
        db.upsert_installation(&new_installation(42)).await.unwrap();
        let claimed = db
            .upsert_installation(&NewInstallation {
                installation_id: 42,
                user_id: Some("user-1".to_string()),
                account_login: String::new(),
                account_type: AccountType::User,
            })
            .await
            .unwrap();
        assert_eq!(claimed.user_id.as_deref(), Some("user-1"));
        assert_eq!(claimed.account_login, "octo-org");
        assert_eq!(claimed.account_type, AccountType::Organization);

        // A later webhook does not drop the claimed owner
        let updated = db.upsert_installation(&new_installation(42)).await.unwrap();
        assert_eq!(updated.user_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_create_review_is_idempotent() {
        let db = Database::in_memory().await.unwrap();
        let installation = db.upsert_installation(&new_installation(42)).await.unwrap();
        let (id, created) = db.create_review(&new_review(installation.id, "abc")).await.unwrap();
        assert!(created);
        let (again, created) = db.create_review(&new_review(installation.id, "abc")).await.unwrap();
        assert_eq!(again, id);
        assert!(!created);
        let (other, created) = db.create_review(&new_review(installation.id, "def")).await.unwrap();
        assert_ne!(other, id);
        assert!(created);

        let review = db.get_review(id).await.unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Pending);
        assert_eq!(review.key.to_string(), "octo-org/widgets#7@abc");
        assert_eq!(db.find_review(&review.key).await.unwrap().unwrap().id, id);
    }

    #[tokio::test]
    async fn test_concurrent_create_review() {
        let db = Database::in_memory().await.unwrap();
        let installation = db.upsert_installation(&new_installation(42)).await.unwrap();
        let review = new_review(installation.id, "abc");
        let (a, b) = tokio::join!(db.create_review(&review), db.create_review(&review));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.0, b.0);
        assert!(a.1 ^ b.1, "exactly one delivery creates the review");
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM reviews")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_review_lifecycle() {
        let db = Database::in_memory().await.unwrap();
        let installation = db.upsert_installation(&new_installation(42)).await.unwrap();
        let (id, _) = db.create_review(&new_review(installation.id, "abc")).await.unwrap();

        let Claim::Claimed(review) = db.claim_review(id).await.unwrap() else {
            panic!("expected claim");
        };
        assert_eq!(review.status, ReviewStatus::Processing);

        let outcome = ReviewOutcome::Completed {
            content: "Looks good".to_string(),
            summary: "Looks good".to_string(),
            files_reviewed: 2,
            comment_id: 99,
        };
        assert!(db.finish_review(id, &outcome).await.unwrap());
        let review = db.get_review(id).await.unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Completed);
        assert_eq!(review.content.as_deref(), Some("Looks good"));
        assert_eq!(review.files_reviewed, 2);
        assert_eq!(review.github_comment_id, Some(99));

        // Final states are never re-entered
        let late = ReviewOutcome::Failed { message: "late".into() };
        assert!(!db.finish_review(id, &late).await.unwrap());
        let Claim::Final(review) = db.claim_review(id).await.unwrap() else {
            panic!("expected final review");
        };
        assert_eq!(review.status, ReviewStatus::Completed);
        assert_eq!(db.claim_review(id + 100).await.unwrap(), Claim::Missing);
    }

    #[tokio::test]
    async fn test_late_success_replaces_duplicate_failure() {
        let db = Database::in_memory().await.unwrap();
        let installation = db.upsert_installation(&new_installation(42)).await.unwrap();
        let (id, _) = db.create_review(&new_review(installation.id, "abc")).await.unwrap();

        // Two deliveries of the same job both claim the review
        assert!(matches!(db.claim_review(id).await.unwrap(), Claim::Claimed(_)));
        assert!(matches!(db.claim_review(id).await.unwrap(), Claim::Claimed(_)));
        let failed = ReviewOutcome::Failed { message: "other delivery failed".to_string() };
        assert!(db.finish_review(id, &failed).await.unwrap());

        let completed = ReviewOutcome::Completed {
            content: "Looks good".to_string(),
            summary: "Looks good".to_string(),
            files_reviewed: 1,
            comment_id: 7,
        };
        assert!(db.finish_review(id, &completed).await.unwrap());
        let review = db.get_review(id).await.unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Completed);
        assert_eq!(review.content.as_deref(), Some("Looks good"));
        assert_eq!(review.error_message, None);
        assert_eq!(review.github_comment_id, Some(7));

        // A failure finishing after the success is dropped
        assert!(!db.finish_review(id, &failed).await.unwrap());
        assert_eq!(db.get_review(id).await.unwrap().unwrap().status, ReviewStatus::Completed);
    }

    async fn review_in(
        db: &Database,
        installation_id: i64,
        sha: &str,
        status: ReviewStatus,
    ) -> i64 {
        let (id, _) = db.create_review(&new_review(installation_id, sha)).await.unwrap();
        sqlx::query("UPDATE reviews SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&db.pool)
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_sql_follows_transitions() {
        let db = Database::in_memory().await.unwrap();
        let installation = db.upsert_installation(&new_installation(42)).await.unwrap();
        let outcomes = [
            ReviewOutcome::Completed {
                content: "c".into(),
                summary: "s".into(),
                files_reviewed: 1,
                comment_id: 1,
            },
            ReviewOutcome::Skipped { summary: "s".into() },
            ReviewOutcome::Failed { message: "m".into() },
        ];
        for from in ReviewStatus::ALL {
            for outcome in &outcomes {
                let sha = format!("{from}-{}", outcome.status());
                let id = review_in(&db, installation.id, &sha, from).await;
                let applied = db.finish_review(id, outcome).await.unwrap();
                assert_eq!(applied, from.can_transition_to(outcome.status()), "{sha}");
            }
            let id = review_in(&db, installation.id, from.as_str(), from).await;
            let claimed = matches!(db.claim_review(id).await.unwrap(), Claim::Claimed(_));
            assert_eq!(claimed, from.is_claimable(), "claim {from}");
        }
    }

    #[tokio::test]
    async fn test_failed_review_can_be_reclaimed() {
        let db = Database::in_memory().await.unwrap();
        let installation = db.upsert_installation(&new_installation(42)).await.unwrap();
        let (id, _) = db.create_review(&new_review(installation.id, "abc")).await.unwrap();

        // Finishing a PENDING review is rejected; it must be claimed first
        let skipped = ReviewOutcome::Skipped { summary: "x".into() };
        assert!(!db.finish_review(id, &skipped).await.unwrap());

        assert!(matches!(db.claim_review(id).await.unwrap(), Claim::Claimed(_)));
        let failed = ReviewOutcome::Failed { message: "rate limited".to_string() };
        assert!(db.finish_review(id, &failed).await.unwrap());
        let review = db.get_review(id).await.unwrap().unwrap();
        assert_eq!(review.status, ReviewStatus::Failed);
        assert_eq!(review.error_message.as_deref(), Some("rate limited"));

        let Claim::Claimed(review) = db.claim_review(id).await.unwrap() else {
            panic!("expected redelivery to reclaim the failed review");
        };
        assert_eq!(review.status, ReviewStatus::Processing);
        assert_eq!(review.error_message, None);
    }
}
