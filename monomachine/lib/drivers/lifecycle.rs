//! State-machine helpers shared by every driver.

use machutils::{wait_for, PollPolicy, Sleeper};

use crate::{host::HostState, MachineError, MachineResult};

use super::Driver;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How long a restart waits for the guest to stop before killing it.
pub type RestartPolicy = PollPolicy;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Restarts a machine with a bounded wait for the guest to shut down.
///
/// The driver is asked to stop, then its state is polled up to `policy.attempts` times,
/// `policy.interval` apart. Once the budget is spent the state is queried one more time; a machine
/// that is still running is killed. The machine is then started exactly once. An `Error` state
/// observed at any point aborts the restart.
pub async fn restart_with_fallback<D>(
    driver: &mut D,
    policy: &RestartPolicy,
    sleeper: &dyn Sleeper,
) -> MachineResult<()>
where
    D: Driver + ?Sized,
{
    let name = driver.machine_name().to_string();
    tracing::info!("restarting {name}");
    driver.stop().await?;

    for attempt in 1..=policy.attempts {
        match driver.get_state().await? {
            HostState::Stopped => {
                tracing::debug!("{name} stopped after {attempt} check(s)");
                return driver.start().await;
            }
            HostState::Error => return Err(MachineError::HostErrorState(name)),
            state => {
                tracing::debug!(
                    "{name} is {state}, waiting to stop ({attempt}/{})",
                    policy.attempts
                );
                sleeper.sleep(policy.interval).await;
            }
        }
    }

    match driver.get_state().await? {
        HostState::Error => return Err(MachineError::HostErrorState(name)),
        HostState::Running => {
            tracing::warn!(
                "{name} did not stop within {:?}, killing it",
                policy.budget()
            );
            driver.kill().await?;
        }
        _ => {}
    }

    driver.start().await
}

/// Polls the driver until the machine reaches `target`.
///
/// Fails with `Timeout` when the budget runs out and with `HostErrorState` as soon as the backend
/// reports an error.
pub async fn wait_for_state<D>(
    driver: &D,
    target: HostState,
    policy: &PollPolicy,
    sleeper: &dyn Sleeper,
) -> MachineResult<()>
where
    D: Driver + ?Sized,
{
    let what = format!("{} to be {target}", driver.machine_name());
    wait_for(&what, policy, sleeper, move || async move {
        match driver.get_state().await? {
            state if state == target => Ok(true),
            HostState::Error => Err(MachineError::HostErrorState(
                driver.machine_name().to_string(),
            )),
            _ => Ok(false),
        }
    })
    .await
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use machutils::InstantSleeper;

    use super::*;
    use crate::drivers::{FakeCall, FakeDriver};

    const POLICY: RestartPolicy = RestartPolicy::new(Duration::from_secs(2), 5);

    #[test_log::test(tokio::test)]
    async fn test_restart_without_kill_when_stop_converges() -> anyhow::Result<()> {
        let mut driver = FakeDriver::running("dev");
        let sleeper = InstantSleeper::new();

        restart_with_fallback(&mut driver, &POLICY, &sleeper).await?;

        let calls = driver.backend_calls();
        assert_eq!(calls, vec![FakeCall::Shutdown, FakeCall::PowerOn]);
        assert_eq!(sleeper.calls(), 0);
        assert_eq!(driver.get_state().await?, HostState::Running);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_restart_kills_once_when_still_running() -> anyhow::Result<()> {
        let mut driver = FakeDriver::running("dev");
        driver.backend().set_stop_converges(false);
        let sleeper = InstantSleeper::new();

        restart_with_fallback(&mut driver, &POLICY, &sleeper).await?;

        let calls = driver.backend_calls();
        assert_eq!(
            calls,
            vec![FakeCall::Shutdown, FakeCall::PowerOff, FakeCall::PowerOn]
        );
        assert_eq!(sleeper.calls(), POLICY.attempts);
        assert_eq!(driver.backend().state_queries(), POLICY.attempts as usize + 2);
        Ok(())
    }

    #[test_log::test(tokio::test)]
    async fn test_restart_aborts_on_error_state() {
        let mut driver = FakeDriver::running("dev");
        driver.backend().set_stop_converges(false);
        driver
            .backend()
            .script_states([HostState::Running, HostState::Error]);
        let sleeper = InstantSleeper::new();

        let result = restart_with_fallback(&mut driver, &POLICY, &sleeper).await;

        assert!(matches!(result, Err(MachineError::HostErrorState(_))));
        assert_eq!(driver.backend_calls(), vec![FakeCall::Shutdown]);
        assert_eq!(sleeper.calls(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_wait_for_state_times_out() {
        let driver = FakeDriver::new("dev");
        let sleeper = InstantSleeper::new();

        let result = wait_for_state(&driver, HostState::Running, &POLICY, &sleeper).await;

        assert!(matches!(result, Err(MachineError::Timeout(_))));
        assert_eq!(sleeper.calls(), POLICY.attempts - 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_wait_for_state_reaches_target() -> anyhow::Result<()> {
        let driver = FakeDriver::new("dev");
        driver
            .backend()
            .script_states([HostState::Starting, HostState::Starting, HostState::Running]);
        let sleeper = InstantSleeper::new();

        wait_for_state(&driver, HostState::Running, &POLICY, &sleeper).await?;
        assert_eq!(sleeper.calls(), 2);
        Ok(())
    }
}
