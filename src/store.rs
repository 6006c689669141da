use std::{future::Future, time::Duration};

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    FromQueryResult, NotSet, QueryFilter, QueryOrder, QuerySelect, Set,
    sea_query::{Expr, LikeExpr},
};
use tracing::{debug, warn};

use crate::{
    entities::movie::{self, Genres},
    filter::{Filter, Metadata},
    models::{Movie, Runtime},
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("edit conflict")]
    EditConflict,
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("unsafe sort parameter: {0}")]
    UnsafeSort(String),
    #[error(transparent)]
    Db(#[from] DbErr),
    #[error("invalid stored timestamp: {0}")]
    Timestamp(#[from] jiff::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait MovieStore: Send + Sync {
    /// Inserts `movie`, writing the assigned id, creation time and version back into it.
    async fn insert(&self, movie: &mut Movie) -> StoreResult<()>;

    async fn get(&self, id: i64) -> StoreResult<Movie>;

    /// Replaces the record if its stored version still equals `movie.version`.
    /// Returns the new version.
    async fn update(&self, movie: &Movie) -> StoreResult<i32>;

    async fn delete(&self, id: i64) -> StoreResult<()>;

    async fn get_all(
        &self,
        title: &str,
        genres: &[String],
        filter: &Filter,
    ) -> StoreResult<(Vec<Movie>, Metadata)>;
}

#[derive(Clone)]
pub struct SqlMovieStore {
    db: DatabaseConnection,
    query_timeout: Duration,
}

impl SqlMovieStore {
    pub fn new(db: DatabaseConnection, query_timeout: Duration) -> Self {
        Self { db, query_timeout }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, DbErr>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.query_timeout, fut).await {
            Ok(res) => Ok(res?),
            Err(_) => {
                warn!(op, timeout = ?self.query_timeout, "query timed out");
                Err(StoreError::Timeout(self.query_timeout))
            },
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct MovieWithTotal {
    total: i64,
    id: i64,
    created_at: i64,
    title: String,
    year: i32,
    runtime: i32,
    genres: Genres,
    version: i32,
}

impl TryFrom<movie::Model> for Movie {
    type Error = StoreError;

    fn try_from(m: movie::Model) -> Result<Self, Self::Error> {
        Ok(Movie {
            id: m.id,
            created_at: jiff::Timestamp::from_second(m.created_at)?,
            title: m.title,
            year: m.year,
            runtime: Runtime(m.runtime),
            genres: m.genres.0,
            version: m.version,
        })
    }
}

impl TryFrom<MovieWithTotal> for Movie {
    type Error = StoreError;

    fn try_from(row: MovieWithTotal) -> Result<Self, Self::Error> {
        Ok(Movie {
            id: row.id,
            created_at: jiff::Timestamp::from_second(row.created_at)?,
            title: row.title,
            year: row.year,
            runtime: Runtime(row.runtime),
            genres: row.genres.0,
            version: row.version,
        })
    }
}

fn sort_column(filter: &Filter) -> StoreResult<movie::Column> {
    match filter.sort_column() {
        Some("id") => Ok(movie::Column::Id),
        Some("title") => Ok(movie::Column::Title),
        Some("year") => Ok(movie::Column::Year),
        Some("runtime") => Ok(movie::Column::Runtime),
        _ => Err(StoreError::UnsafeSort(filter.sort.clone())),
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn list_condition(title: &str, genres: &[String]) -> Condition {
    let mut cond = Condition::all();

    if !title.is_empty() {
        let pattern = format!("%{}%", escape_like(&title.to_lowercase()));
        cond = cond.add(
            Expr::col(movie::Column::TitleLower).like(LikeExpr::new(pattern).escape('\\')),
        );
    }

    for genre in genres {
        cond = cond.add(Expr::cust_with_values(
            "EXISTS (SELECT 1 FROM json_each(movies.genres) WHERE json_each.value = ?)",
            [genre.clone()],
        ));
    }

    cond
}

#[async_trait]
impl MovieStore for SqlMovieStore {
    async fn insert(&self, movie: &mut Movie) -> StoreResult<()> {
        let model = movie::ActiveModel {
            id: NotSet,
            created_at: Set(jiff::Timestamp::now().as_second()),
            title: Set(movie.title.clone()),
            title_lower: Set(movie.title.to_lowercase()),
            year: Set(movie.year),
            runtime: Set(movie.runtime.0),
            genres: Set(Genres(movie.genres.clone())),
            version: Set(1),
        };

        let inserted = self.bounded("insert", model.insert(&self.db)).await?;
        debug!(id = inserted.id, "inserted movie");

        movie.id = inserted.id;
        movie.created_at = jiff::Timestamp::from_second(inserted.created_at)?;
        movie.version = inserted.version;
        Ok(())
    }

    async fn get(&self, id: i64) -> StoreResult<Movie> {
        if id < 1 {
            return Err(StoreError::NotFound);
        }

        let found = self.bounded("get", movie::Entity::find_by_id(id).one(&self.db)).await?;
        debug!(id, found = found.is_some(), "fetched movie");

        found.ok_or(StoreError::NotFound)?.try_into()
    }

    async fn update(&self, movie: &Movie) -> StoreResult<i32> {
        let query = movie::Entity::update_many()
            .col_expr(movie::Column::Title, Expr::value(movie.title.clone()))
            .col_expr(movie::Column::TitleLower, Expr::value(movie.title.to_lowercase()))
            .col_expr(movie::Column::Year, Expr::value(movie.year))
            .col_expr(movie::Column::Runtime, Expr::value(movie.runtime.0))
            .col_expr(movie::Column::Genres, Expr::value(Genres(movie.genres.clone())))
            .col_expr(movie::Column::Version, Expr::col(movie::Column::Version).add(1))
            .filter(movie::Column::Id.eq(movie.id))
            .filter(movie::Column::Version.eq(movie.version))
            .exec(&self.db);

        let result = self.bounded("update", query).await?;
        if result.rows_affected == 0 {
            debug!(id = movie.id, version = movie.version, "update matched no row");
            return Err(StoreError::EditConflict);
        }

        let new_version = movie.version + 1;
        debug!(id = movie.id, version = new_version, "updated movie");
        Ok(new_version)
    }

    async fn delete(&self, id: i64) -> StoreResult<()> {
        if id < 1 {
            return Err(StoreError::NotFound);
        }

        let result =
            self.bounded("delete", movie::Entity::delete_by_id(id).exec(&self.db)).await?;
        if result.rows_affected == 0 {
            return Err(StoreError::NotFound);
        }

        debug!(id, "deleted movie");
        Ok(())
    }

    async fn get_all(
        &self,
        title: &str,
        genres: &[String],
        filter: &Filter,
    ) -> StoreResult<(Vec<Movie>, Metadata)> {
        let column = sort_column(filter)?;

        let query = movie::Entity::find()
            .column_as(Expr::cust("COUNT(*) OVER()"), "total")
            .filter(list_condition(title, genres))
            .order_by(column, filter.sort_direction())
            .order_by_asc(movie::Column::Id)
            .limit(filter.limit())
            .offset(filter.offset())
            .into_model::<MovieWithTotal>()
            .all(&self.db);

        let rows = self.bounded("get_all", query).await?;
        let total = rows.first().map(|r| r.total).unwrap_or(0);

        debug!(
            title = %title,
            genres = ?genres,
            returned = rows.len(),
            total,
            "listed movies"
        );

        let movies = rows.into_iter().map(Movie::try_from).collect::<StoreResult<Vec<_>>>()?;
        Ok((movies, Metadata::calculate(total, filter.page, filter.page_size)))
    }
}

/// Store that touches nothing. Lets the HTTP layer run without a database.
#[cfg(test)]
#[derive(Clone, Copy, Debug, Default)]
pub struct MockMovieStore;

#[cfg(test)]
#[async_trait]
impl MovieStore for MockMovieStore {
    async fn insert(&self, _movie: &mut Movie) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, _id: i64) -> StoreResult<Movie> {
        Err(StoreError::NotFound)
    }

    async fn update(&self, movie: &Movie) -> StoreResult<i32> {
        Ok(movie.version + 1)
    }

    async fn delete(&self, _id: i64) -> StoreResult<()> {
        Ok(())
    }

    async fn get_all(
        &self,
        _title: &str,
        _genres: &[String],
        _filter: &Filter,
    ) -> StoreResult<(Vec<Movie>, Metadata)> {
        Ok((Vec::new(), Metadata::default()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::db::{self, PoolOptions};

    pub(crate) async fn sqlite_store() -> (SqlMovieStore, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("movies.db").display());
        let pool = PoolOptions {
            max_connections: 4,
            min_connections: 1,
            idle_timeout: Duration::from_secs(60),
        };
        let db = db::connect(&url, pool).await.expect("connect");
        (SqlMovieStore::new(db, Duration::from_secs(5)), dir)
    }

    pub(crate) fn movie(title: &str, year: i32, genres: &[&str]) -> Movie {
        Movie {
            title: title.to_string(),
            year,
            runtime: Runtime(100),
            genres: genres.iter().map(|g| g.to_string()).collect(),
            ..Default::default()
        }
    }

    fn filter(page: i64, page_size: i64, sort: &str) -> Filter {
        Filter { page, page_size, sort: sort.to_string(), ..Default::default() }
    }

    #[tokio::test]
    async fn insert_then_get_returns_same_fields() {
        let (store, _dir) = sqlite_store().await;
        let mut m = movie("Moana", 2016, &["animation", "adventure"]);

        store.insert(&mut m).await.unwrap();
        assert!(m.id > 0);
        assert_eq!(m.version, 1);

        let fetched = store.get(m.id).await.unwrap();
        assert_eq!(fetched.title, "Moana");
        assert_eq!(fetched.year, 2016);
        assert_eq!(fetched.runtime, Runtime(100));
        assert_eq!(fetched.genres, vec!["animation", "adventure"]);
        assert_eq!(fetched.version, 1);
        assert_eq!(fetched.created_at, m.created_at);
    }

    #[tokio::test]
    async fn non_positive_ids_are_not_found() {
        let (store, _dir) = sqlite_store().await;
        for id in [0, -1] {
            assert!(matches!(store.get(id).await, Err(StoreError::NotFound)));
            assert!(matches!(store.delete(id).await, Err(StoreError::NotFound)));
        }
        assert!(matches!(store.get(42).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn update_with_current_version_bumps_it() {
        let (store, _dir) = sqlite_store().await;
        let mut m = movie("Black Panther", 2018, &["action"]);
        store.insert(&mut m).await.unwrap();

        m.title = "Black Panther: Wakanda".to_string();
        m.genres.push("adventure".to_string());
        m.version = store.update(&m).await.unwrap();
        assert_eq!(m.version, 2);

        let fetched = store.get(m.id).await.unwrap();
        assert_eq!(fetched.title, "Black Panther: Wakanda");
        assert_eq!(fetched.genres, vec!["action", "adventure"]);
        assert_eq!(fetched.version, 2);
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let (store, _dir) = sqlite_store().await;
        let mut m = movie("Deadpool", 2016, &["comedy"]);
        store.insert(&mut m).await.unwrap();

        let stale = m.clone();
        m.version = store.update(&m).await.unwrap();

        assert!(matches!(store.update(&stale).await, Err(StoreError::EditConflict)));
        assert_eq!(store.get(m.id).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn update_of_deleted_record_conflicts() {
        let (store, _dir) = sqlite_store().await;
        let mut m = movie("The Breakfast Club", 1985, &["drama"]);
        store.insert(&mut m).await.unwrap();
        store.delete(m.id).await.unwrap();

        assert!(matches!(store.update(&m).await, Err(StoreError::EditConflict)));
        assert!(matches!(store.delete(m.id).await, Err(StoreError::NotFound)));
    }

    #[tokio::test]
    async fn get_all_windows_and_counts_full_set() {
        let (store, _dir) = sqlite_store().await;
        for i in 0..25 {
            let mut m = movie(&format!("Movie {i:02}"), 2000, &["drama"]);
            store.insert(&mut m).await.unwrap();
        }

        let (page1, meta1) = store.get_all("", &[], &filter(1, 20, "id")).await.unwrap();
        assert_eq!(page1.len(), 20);
        assert_eq!(meta1.total_records, 25);
        assert_eq!(meta1.last_page, 2);

        let (page2, meta2) = store.get_all("", &[], &filter(2, 20, "id")).await.unwrap();
        assert_eq!(page2.len(), 5);
        assert_eq!(meta2.total_records, 25);
        assert_eq!(meta2.current_page, 2);

        let (page3, meta3) = store.get_all("", &[], &filter(3, 20, "id")).await.unwrap();
        assert!(page3.is_empty());
        assert_eq!(meta3, Metadata::default());
    }

    #[tokio::test]
    async fn get_all_filters_by_title_and_genres() {
        let (store, _dir) = sqlite_store().await;
        for (title, genres) in [
            ("The Club", &["drama", "comedy"][..]),
            ("Club Paradise", &["comedy"][..]),
            ("Heat", &["crime", "drama"][..]),
        ] {
            let mut m = movie(title, 1990, genres);
            store.insert(&mut m).await.unwrap();
        }

        let (by_title, meta) = store.get_all("CLUB", &[], &filter(1, 20, "id")).await.unwrap();
        assert_eq!(by_title.len(), 2);
        assert_eq!(meta.total_records, 2);

        let drama = vec!["drama".to_string()];
        let (by_genre, _) = store.get_all("", &drama, &filter(1, 20, "id")).await.unwrap();
        let titles: Vec<_> = by_genre.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, ["The Club", "Heat"]);

        let both = vec!["drama".to_string(), "comedy".to_string()];
        let (combined, _) = store.get_all("club", &both, &filter(1, 20, "id")).await.unwrap();
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].title, "The Club");

        let (none, meta) = store.get_all("100%", &[], &filter(1, 20, "id")).await.unwrap();
        assert!(none.is_empty());
        assert_eq!(meta, Metadata::default());
    }

    #[tokio::test]
    async fn get_all_title_match_folds_non_ascii_case() {
        let (store, _dir) = sqlite_store().await;
        let mut m = movie("Émile et les Détectives", 1931, &["family"]);
        store.insert(&mut m).await.unwrap();

        for query in ["Émile et les Détectives", "émile", "ÉMILE", "MILE", "détect"] {
            let (found, meta) = store.get_all(query, &[], &filter(1, 20, "id")).await.unwrap();
            assert_eq!(found.len(), 1, "{query}");
            assert_eq!(meta.total_records, 1, "{query}");
        }

        m.title = "Ödön".to_string();
        m.version = store.update(&m).await.unwrap();
        let (found, _) = store.get_all("ödön", &[], &filter(1, 20, "id")).await.unwrap();
        assert_eq!(found.len(), 1);
        let (stale, _) = store.get_all("émile", &[], &filter(1, 20, "id")).await.unwrap();
        assert!(stale.is_empty());
    }

    #[tokio::test]
    async fn bounded_query_times_out() {
        let (store, _dir) = sqlite_store().await;
        let store = SqlMovieStore::new(store.db.clone(), Duration::from_millis(10));

        let result = store.bounded("pending", std::future::pending::<Result<(), DbErr>>()).await;
        assert!(matches!(result, Err(StoreError::Timeout(t)) if t == Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn get_all_orders_by_sort_column() {
        let (store, _dir) = sqlite_store().await;
        for (title, year) in [("B", 1999), ("A", 2010), ("C", 1950)] {
            let mut m = movie(title, year, &["drama"]);
            store.insert(&mut m).await.unwrap();
        }

        let (desc_year, _) = store.get_all("", &[], &filter(1, 20, "-year")).await.unwrap();
        let years: Vec<_> = desc_year.iter().map(|m| m.year).collect();
        assert_eq!(years, [2010, 1999, 1950]);

        let (asc_title, _) = store.get_all("", &[], &filter(1, 20, "title")).await.unwrap();
        let titles: Vec<_> = asc_title.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn get_all_refuses_unlisted_sort() {
        let (store, _dir) = sqlite_store().await;
        let result = store.get_all("", &[], &filter(1, 20, "created_at")).await;
        assert!(matches!(result, Err(StoreError::UnsafeSort(_))));
    }

    #[tokio::test]
    async fn mock_store_is_inert() {
        let store = MockMovieStore;
        let mut m = movie("Anything", 2000, &["drama"]);
        store.insert(&mut m).await.unwrap();
        assert_eq!(m.id, 0);
        assert!(matches!(store.get(1).await, Err(StoreError::NotFound)));
        let (movies, meta) = store.get_all("", &[], &Filter::default()).await.unwrap();
        assert!(movies.is_empty());
        assert_eq!(meta, Metadata::default());
    }
}
