//! In-memory Post / Draw repositories.
//!
//! 開発・テスト用。作成順を保持するので `list_ready` は古い順に返す。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::context::Context;
use crate::domain::{Draw, Post, PostId};
use crate::ports::{DrawRepository, PostRepository, RepositoryError};

fn check_ctx(ctx: &Context) -> Result<(), RepositoryError> {
    match ctx.err() {
        Some(reason) => Err(RepositoryError::storage(reason)),
        None => Ok(()),
    }
}

/// Records kept in creation order.
struct Table<T> {
    rows: HashMap<PostId, T>,
    order: Vec<PostId>,
}

impl<T: Clone> Table<T> {
    fn new() -> Self {
        Self {
            rows: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// false if the key is already taken.
    fn insert_new(&mut self, key: PostId, row: T) -> bool {
        if self.rows.contains_key(&key) {
            return false;
        }
        self.order.push(key.clone());
        self.rows.insert(key, row);
        true
    }

    fn in_order(&self) -> impl Iterator<Item = &T> {
        self.order.iter().filter_map(|key| self.rows.get(key))
    }
}

pub struct InMemoryPostRepository {
    state: Mutex<Table<Post>>,
}

impl InMemoryPostRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Table::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryPostRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostRepository for InMemoryPostRepository {
    async fn create(&self, ctx: &Context, post: &Post) -> Result<(), RepositoryError> {
        check_ctx(ctx)?;
        let mut state = self.state.lock().await;
        if !state.insert_new(post.id().clone(), post.clone()) {
            return Err(RepositoryError::PostAlreadyExists(post.id().clone()));
        }
        Ok(())
    }

    async fn get(&self, ctx: &Context, id: &PostId) -> Result<Post, RepositoryError> {
        check_ctx(ctx)?;
        let state = self.state.lock().await;
        state
            .rows
            .get(id)
            .cloned()
            .ok_or_else(|| RepositoryError::PostNotFound(id.clone()))
    }

    async fn list_ready(&self, ctx: &Context, limit: usize) -> Result<Vec<Post>, RepositoryError> {
        check_ctx(ctx)?;
        let state = self.state.lock().await;
        Ok(state
            .in_order()
            .filter(|post| post.is_ready())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update(&self, ctx: &Context, post: &Post) -> Result<(), RepositoryError> {
        check_ctx(ctx)?;
        let mut state = self.state.lock().await;
        match state.rows.get_mut(post.id()) {
            Some(stored) => {
                *stored = post.clone();
                Ok(())
            }
            None => Err(RepositoryError::PostNotFound(post.id().clone())),
        }
    }
}

pub struct InMemoryDrawRepository {
    state: Mutex<Table<Draw>>,
}

impl InMemoryDrawRepository {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Table::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryDrawRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DrawRepository for InMemoryDrawRepository {
    async fn create(&self, ctx: &Context, draw: &Draw) -> Result<(), RepositoryError> {
        check_ctx(ctx)?;
        let mut state = self.state.lock().await;
        if !state.insert_new(draw.post_id().clone(), draw.clone()) {
            return Err(RepositoryError::DrawAlreadyExists(draw.post_id().clone()));
        }
        Ok(())
    }

    async fn get_by_post_id(
        &self,
        ctx: &Context,
        post_id: &PostId,
    ) -> Result<Draw, RepositoryError> {
        check_ctx(ctx)?;
        let state = self.state.lock().await;
        state
            .rows
            .get(post_id)
            .cloned()
            .ok_or_else(|| RepositoryError::DrawNotFound(post_id.clone()))
    }

    async fn list_ready(&self, ctx: &Context) -> Result<Vec<Draw>, RepositoryError> {
        check_ctx(ctx)?;
        let state = self.state.lock().await;
        Ok(state.in_order().filter(|draw| draw.is_verified()).cloned().collect())
    }
}
