//! Thread scheduling state and the suspended-process rule

/// Why a waiting thread is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    Suspended,
    Other(u32),
}

/// Scheduler state of one thread, normalized across platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Ready,
    Waiting(WaitReason),
    Terminated,
    Other(u32),
}

// KTHREAD_STATE / KWAIT_REASON values
const NT_STATE_INITIALIZED: u32 = 0;
const NT_STATE_READY: u32 = 1;
const NT_STATE_RUNNING: u32 = 2;
const NT_STATE_STANDBY: u32 = 3;
const NT_STATE_TERMINATED: u32 = 4;
const NT_STATE_WAITING: u32 = 5;
const NT_WAIT_SUSPENDED: u32 = 5;

impl ThreadState {
    /// From `SYSTEM_THREAD_INFORMATION` state and wait reason.
    pub fn from_nt(state: u32, wait_reason: u32) -> Self {
        match state {
            NT_STATE_WAITING if wait_reason == NT_WAIT_SUSPENDED => {
                ThreadState::Waiting(WaitReason::Suspended)
            }
            NT_STATE_WAITING => ThreadState::Waiting(WaitReason::Other(wait_reason)),
            NT_STATE_RUNNING => ThreadState::Running,
            NT_STATE_READY | NT_STATE_STANDBY | NT_STATE_INITIALIZED => ThreadState::Ready,
            NT_STATE_TERMINATED => ThreadState::Terminated,
            other => ThreadState::Other(other),
        }
    }

    /// From the one-letter state in `/proc/<pid>/task/<tid>/stat`.
    pub fn from_proc_state(state: char) -> Self {
        match state {
            'R' => ThreadState::Running,
            'T' | 't' => ThreadState::Waiting(WaitReason::Suspended),
            'S' | 'D' | 'I' | 'W' | 'P' => ThreadState::Waiting(WaitReason::Other(state as u32)),
            'Z' | 'X' | 'x' => ThreadState::Terminated,
            other => ThreadState::Other(other as u32),
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, ThreadState::Waiting(WaitReason::Suspended))
    }
}

/// True only when every thread is waiting with reason `Suspended`.
/// A process with no visible threads is not reported as suspended.
pub fn all_suspended<I>(states: I) -> bool
where
    I: IntoIterator<Item = ThreadState>,
{
    let mut seen = false;
    for state in states {
        if !state.is_suspended() {
            return false;
        }
        seen = true;
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUSPENDED: ThreadState = ThreadState::Waiting(WaitReason::Suspended);

    #[test]
    fn test_all_threads_suspended() {
        assert!(all_suspended([SUSPENDED, SUSPENDED]));
    }

    #[test]
    fn test_one_running_thread_flips_result() {
        assert!(!all_suspended([SUSPENDED, SUSPENDED, ThreadState::Running]));
        assert!(!all_suspended([
            SUSPENDED,
            ThreadState::Waiting(WaitReason::Other(6)),
        ]));
    }

    #[test]
    fn test_no_threads() {
        assert!(!all_suspended(std::iter::empty()));
    }

    #[test]
    fn test_nt_states() {
        assert_eq!(ThreadState::from_nt(5, 5), SUSPENDED);
        assert_eq!(
            ThreadState::from_nt(5, 13),
            ThreadState::Waiting(WaitReason::Other(13))
        );
        assert_eq!(ThreadState::from_nt(2, 5), ThreadState::Running);
        assert_eq!(ThreadState::from_nt(9, 0), ThreadState::Other(9));
    }

    #[test]
    fn test_proc_states() {
        assert!(ThreadState::from_proc_state('T').is_suspended());
        assert!(!ThreadState::from_proc_state('S').is_suspended());
        assert_eq!(ThreadState::from_proc_state('R'), ThreadState::Running);
        assert_eq!(ThreadState::from_proc_state('Z'), ThreadState::Terminated);
    }
}
