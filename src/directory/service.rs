//! Builds and caches directories by name.

use crate::config::DirectoryDescriptor;
use crate::directory::{DirectoryEnvironment, SqlDirectory};
use crate::error::{DirectoryError, DirectoryResult};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Registry of directory descriptors and the directories built from them.
pub struct DirectoryService {
    descriptors: IndexMap<String, DirectoryDescriptor>,
    env: DirectoryEnvironment,
    directories: Mutex<HashMap<String, Arc<SqlDirectory>>>,
}

impl std::fmt::Debug for DirectoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryService")
            .field("descriptors", &self.descriptors.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl DirectoryService {
    /// Register descriptors. Names must be unique.
    pub fn new(
        descriptors: Vec<DirectoryDescriptor>,
        env: DirectoryEnvironment,
    ) -> DirectoryResult<Self> {
        let mut by_name = IndexMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            descriptor.validate()?;
            if by_name.contains_key(&descriptor.name) {
                return Err(DirectoryError::configuration(
                    &descriptor.name,
                    "directory is declared twice",
                ));
            }
            by_name.insert(descriptor.name.clone(), descriptor);
        }
        Ok(Self {
            descriptors: by_name,
            env,
            directories: Mutex::new(HashMap::new()),
        })
    }

    /// Declared directory names, in declaration order.
    pub fn names(&self) -> Vec<String> {
        self.descriptors.keys().cloned().collect()
    }

    pub fn environment(&self) -> &DirectoryEnvironment {
        &self.env
    }

    /// Get a directory, building it and its init dependencies if needed.
    pub async fn get_directory(&self, name: &str) -> DirectoryResult<Arc<SqlDirectory>> {
        self.build(name.to_string(), Vec::new()).await
    }

    fn build(&self, name: String, mut path: Vec<String>) -> BoxFuture<'_, DirectoryResult<Arc<SqlDirectory>>> {
        async move {
            if let Some(directory) = self.directories.lock().await.get(&name) {
                return Ok(directory.clone());
            }

            let descriptor = self.descriptors.get(&name).ok_or_else(|| {
                DirectoryError::configuration(&name, "no such directory is declared")
            })?;
            if path.contains(&name) {
                path.push(name.clone());
                return Err(DirectoryError::configuration(
                    &name,
                    format!("circular init dependencies: {}", path.join(" -> ")),
                ));
            }
            path.push(name.clone());

            for dependency in &descriptor.init_dependencies {
                debug!(directory = %name, dependency = %dependency, "Initializing dependency first");
                self.build(dependency.clone(), path.clone()).await?;
            }

            let directory = SqlDirectory::new(descriptor.clone(), &self.env).await?;

            // Re-check after async work, another caller may have built it
            let existing = {
                let mut directories = self.directories.lock().await;
                match directories.get(&name) {
                    Some(existing) => Some(existing.clone()),
                    None => {
                        directories.insert(name.clone(), directory.clone());
                        None
                    }
                }
            };
            if let Some(existing) = existing {
                directory.shutdown().await;
                return Ok(existing);
            }
            Ok(directory)
        }
        .boxed()
    }

    /// Build every declared directory.
    pub async fn build_all(&self) -> DirectoryResult<Vec<Arc<SqlDirectory>>> {
        let mut built = Vec::with_capacity(self.descriptors.len());
        for name in self.descriptors.keys() {
            built.push(self.get_directory(name).await?);
        }
        Ok(built)
    }

    /// Shut down and forget every built directory.
    pub async fn shutdown_all(&self) {
        let directories: Vec<(String, Arc<SqlDirectory>)> =
            self.directories.lock().await.drain().collect();
        for (name, directory) in directories {
            info!(directory = %name, "Shutting down directory");
            directory.shutdown().await;
        }
    }
}
