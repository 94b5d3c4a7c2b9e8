use std::path::PathBuf;

use crate::error::AcquisitionError;

/// Observable state of one acquisition pipeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AcquisitionState {
    #[default]
    Idle,
    Fetching,
    Downloading(f32),
    Ready {
        remote_url: String,
        local_path: Option<PathBuf>,
    },
    Playing(PathBuf),
    Error {
        message: String,
        retryable: bool,
    },
    Timeout,
    Dismissed,
}

/// Inputs to the state machine. Every transition is a function of the
/// current state and exactly one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    Begin,
    CacheHit(PathBuf),
    Extracted(String),
    DownloadStarted,
    Progress(f32),
    Completed(PathBuf),
    Failed(AcquisitionError),
    Cancelled,
}

impl AcquisitionState {
    /// A run is in flight and will produce further transitions on its own.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            AcquisitionState::Fetching
                | AcquisitionState::Downloading(_)
                | AcquisitionState::Ready { .. }
        )
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, AcquisitionState::Playing(_))
    }

    /// `Error` and `Timeout` both offer a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            AcquisitionState::Error { retryable, .. } => *retryable,
            AcquisitionState::Timeout => true,
            _ => false,
        }
    }

    /// Whether `start()` may begin a new run from this state.
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            AcquisitionState::Idle
                | AcquisitionState::Error { .. }
                | AcquisitionState::Timeout
                | AcquisitionState::Dismissed
        )
    }

    pub fn local_path(&self) -> Option<&PathBuf> {
        match self {
            AcquisitionState::Playing(path) => Some(path),
            AcquisitionState::Ready { local_path, .. } => local_path.as_ref(),
            _ => None,
        }
    }

    /// Apply one event. Returns `None` when the event has no meaning in the
    /// current state and must be dropped.
    pub fn on_event(&self, event: AcquisitionEvent) -> Option<AcquisitionState> {
        use AcquisitionEvent as E;
        use AcquisitionState as S;

        match (self, event) {
            (_, E::Cancelled) => Some(S::Dismissed),

            (S::Idle | S::Error { .. } | S::Timeout | S::Dismissed | S::Fetching, E::Begin) => {
                Some(S::Fetching)
            }

            (S::Idle | S::Fetching | S::Error { .. } | S::Timeout | S::Dismissed, E::CacheHit(path)) => {
                Some(S::Playing(path))
            }

            (S::Fetching, E::Extracted(remote_url)) => Some(S::Ready {
                remote_url,
                local_path: None,
            }),

            (S::Ready { .. }, E::DownloadStarted) => Some(S::Downloading(0.0)),

            (S::Ready { .. } | S::Downloading(_), E::Progress(progress)) => {
                Some(S::Downloading(progress.clamp(0.0, 1.0)))
            }

            (S::Ready { .. } | S::Downloading(_), E::Completed(path)) => Some(S::Playing(path)),

            // Only an extraction still pending can time out
            (S::Fetching, E::Failed(AcquisitionError::Timeout)) => Some(S::Timeout),
            (_, E::Failed(AcquisitionError::Timeout)) => None,

            (S::Fetching | S::Ready { .. } | S::Downloading(_), E::Failed(err)) => Some(S::Error {
                message: err.to_string(),
                retryable: err.is_retryable(),
            }),

            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_sequence() {
        let state = AcquisitionState::Idle;
        let state = state.on_event(AcquisitionEvent::Begin).unwrap();
        assert_eq!(state, AcquisitionState::Fetching);

        let state = state
            .on_event(AcquisitionEvent::Extracted("https://cdn.test/v.mp4".into()))
            .unwrap();
        assert!(matches!(state, AcquisitionState::Ready { local_path: None, .. }));

        let state = state.on_event(AcquisitionEvent::DownloadStarted).unwrap();
        assert_eq!(state, AcquisitionState::Downloading(0.0));

        let state = state.on_event(AcquisitionEvent::Progress(0.4)).unwrap();
        assert_eq!(state, AcquisitionState::Downloading(0.4));

        let state = state
            .on_event(AcquisitionEvent::Completed(PathBuf::from("/tmp/v.mp4")))
            .unwrap();
        assert_eq!(state, AcquisitionState::Playing(PathBuf::from("/tmp/v.mp4")));
    }

    #[test]
    fn timeout_only_applies_while_fetching() {
        assert_eq!(
            AcquisitionState::Fetching.on_event(AcquisitionEvent::Failed(AcquisitionError::Timeout)),
            Some(AcquisitionState::Timeout)
        );
        assert_eq!(
            AcquisitionState::Downloading(0.5).on_event(AcquisitionEvent::Failed(AcquisitionError::Timeout)),
            None
        );
        assert_eq!(
            AcquisitionState::Playing(PathBuf::from("/v.mp4")).on_event(AcquisitionEvent::Failed(AcquisitionError::Timeout)),
            None
        );
    }

    #[test]
    fn late_extraction_after_timeout_is_dropped() {
        assert_eq!(
            AcquisitionState::Timeout.on_event(AcquisitionEvent::Extracted("https://late".into())),
            None
        );
    }

    #[test]
    fn not_supported_becomes_retryable_error() {
        let state = AcquisitionState::Fetching
            .on_event(AcquisitionEvent::Failed(AcquisitionError::NotSupported))
            .unwrap();
        assert!(state.is_retryable());
        assert_ne!(state, AcquisitionState::Dismissed);
        match state {
            AcquisitionState::Error { message, .. } => {
                assert!(message.starts_with("content not available"))
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn progress_is_clamped() {
        let state = AcquisitionState::Downloading(0.2)
            .on_event(AcquisitionEvent::Progress(1.7))
            .unwrap();
        assert_eq!(state, AcquisitionState::Downloading(1.0));
    }

    #[test]
    fn cancel_wins_from_anywhere() {
        for state in [
            AcquisitionState::Idle,
            AcquisitionState::Fetching,
            AcquisitionState::Downloading(0.3),
            AcquisitionState::Timeout,
            AcquisitionState::Playing(PathBuf::from("/v.mp4")),
        ] {
            assert_eq!(
                state.on_event(AcquisitionEvent::Cancelled),
                Some(AcquisitionState::Dismissed)
            );
        }
    }

    #[test]
    fn start_is_refused_while_running_or_playing() {
        assert!(AcquisitionState::Idle.can_start());
        assert!(AcquisitionState::Timeout.can_start());
        assert!(!AcquisitionState::Fetching.can_start());
        assert!(!AcquisitionState::Downloading(0.1).can_start());
        assert!(!AcquisitionState::Playing(PathBuf::from("/v.mp4")).can_start());
    }
}
