mod tracing_helper;

#[cfg(windows)]
mod bridge {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use points64_lib::{
        memory_accessors::{find_process_id, ExternalProcess},
        patches::PatchStore,
        session::{EmulatorSession, EmulatorState},
        settings::SettingsRepo,
    };
    use tokio::{
        io::{stdin, AsyncBufReadExt, BufReader, Lines, Stdin},
        time::sleep,
    };
    use tracing::{info, warn};

    const EMULATOR_EXE: &str = "project64";
    const SETTINGS_FILE: &str = "points64.toml";
    const PATCHES_DIR: &str = "patches";
    const FIND_PROCESS_INTERVAL: Duration = Duration::from_secs(1);
    const SESSION_POLL: Duration = Duration::from_millis(500);

    /// Redemptions arrive on stdin, one per line: the reward title,
    /// optionally followed by a tab and the viewer's input.
    pub async fn main() -> Result<()> {
        info!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        let settings = Arc::new(SettingsRepo::new(SETTINGS_FILE.into()));
        let mut redemptions = BufReader::new(stdin()).lines();
        loop {
            let session = wait_for_emulator(&settings).await?;
            if !feed_redemptions(&session, &mut redemptions).await? {
                session.shutdown();
                return Ok(());
            }
            info!("emulator is gone, waiting for a new process");
        }
    }

    async fn wait_for_emulator(settings: &Arc<SettingsRepo>) -> Result<Arc<EmulatorSession>> {
        info!("waiting for a {EMULATOR_EXE} process");
        loop {
            let Ok(pid) = find_process_id(EMULATOR_EXE) else {
                sleep(FIND_PROCESS_INTERVAL).await;
                continue;
            };
            let accessor = ExternalProcess::open(pid)?;
            let patches = PatchStore::new(PATCHES_DIR);
            match EmulatorSession::bind(Box::new(accessor), pid, patches, Arc::clone(settings))
                .await
            {
                Ok(session) => return Ok(session),
                Err(err) => {
                    warn!("binding process {pid} failed: {err:#}");
                    sleep(FIND_PROCESS_INTERVAL).await;
                }
            }
        }
    }

    /// Returns `false` once stdin closes, `true` when the emulator died and
    /// a new session should be bound.
    async fn feed_redemptions(
        session: &EmulatorSession,
        redemptions: &mut Lines<BufReader<Stdin>>,
    ) -> Result<bool> {
        loop {
            tokio::select! {
                line = redemptions.next_line() => {
                    let Some(line) = line? else {
                        return Ok(false);
                    };
                    handle_line(session, &line).await;
                }
                () = sleep(SESSION_POLL) => {
                    if session.state() == EmulatorState::NotConnected {
                        return Ok(true);
                    }
                }
            }
        }
    }

    async fn handle_line(session: &EmulatorSession, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if let Some(rest) = line.strip_prefix("/patch") {
            let sets: Vec<String> = rest.split_whitespace().map(str::to_owned).collect();
            let requested = (!sets.is_empty()).then_some(sets);
            if let Err(err) = session.patch_memory(requested.as_deref()).await {
                warn!("patching failed: {err:#}");
            }
            return;
        }
        let (title, user_input) = match line.split_once('\t') {
            Some((title, input)) => (title, Some(input)),
            None => (line, None),
        };
        session.execute_effect(title, user_input);
    }
}

#[cfg(windows)]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_helper::init_tracing();
    bridge::main().await
}

#[cfg(not(windows))]
fn main() -> anyhow::Result<()> {
    tracing_helper::init_tracing();
    anyhow::bail!("{} drives a Windows emulator process", env!("CARGO_PKG_NAME"));
}
