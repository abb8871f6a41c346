use thiserror::Error;

use super::job::JobId;

#[derive(Debug, Error)]
pub enum JobError {
	#[error("job not found <id='{0}'>")]
	JobNotFound(JobId),
}
