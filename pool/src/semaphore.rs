use std::sync::Arc;

/// Optional concurrency limit; a limit of 0 disables it
#[derive(Debug, Clone)]
pub struct Semaphore {
    sem: Option<Arc<tokio::sync::Semaphore>>,
    limit: usize,
}

impl Semaphore {
    pub fn new(limit: usize) -> Self {
        let sem = if limit > 0 {
            Some(Arc::new(tokio::sync::Semaphore::new(limit)))
        } else {
            None
        };
        Self { sem, limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn available(&self) -> usize {
        self.sem
            .as_ref()
            .map_or(usize::MAX, |sem| sem.available_permits())
    }

    pub async fn acquire(
        &self,
    ) -> Result<Option<tokio::sync::OwnedSemaphorePermit>, crate::TaskError> {
        match &self.sem {
            Some(sem) => sem
                .clone()
                .acquire_owned()
                .await
                .map(Some)
                .map_err(|_| crate::TaskError::Closed),
            None => Ok(None),
        }
    }

    pub fn close(&self) {
        if let Some(sem) = &self.sem {
            sem.close();
        }
    }
}
