use std::sync::{Arc, Mutex};

use anyhow::Result;
use tokio::{task::JoinHandle, time::interval};
use tracing::{error, info, warn};

use crate::{
    effects,
    memory_accessors::MemoryAccessor,
    patches::{swap_bytes, PatchStore},
    settings::SettingsRepo,
    sm64::{offsets, EmulatorVariant, Sm64, STAR_GRAB_ACTIONS},
    watcher::{watch_bytes, DEFAULT_POLL_INTERVAL},
};

/// The frame counter sits below this right after a boot.
const BOOT_FRAME_THRESHOLD: u32 = 120;
/// Once the counter passes this, the game is past its boot sequence and
/// safe to patch.
const STABLE_FRAME_THRESHOLD: u32 = 900;

const LIVENESS_POLL: std::time::Duration = std::time::Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmulatorState {
    NotConnected,
    Connecting,
    Connected,
    Patching,
    Patched,
}

/// One bound emulator process: the discovered base address, the patch
/// state and the watcher subscriptions. Exactly one session is bound at a
/// time; callers must shut the old one down before binding a new process.
pub struct EmulatorSession {
    pid: u32,
    memory: Arc<Sm64>,
    variant: EmulatorVariant,
    patches: PatchStore,
    settings: Arc<SettingsRepo>,
    state: Mutex<EmulatorState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EmulatorSession {
    /// Scans for the base address, resets the network-compatibility cells
    /// and starts the watcher subscriptions.
    ///
    /// A failed scan surfaces as [`crate::BaseAddressNotFound`]; there is
    /// no retry.
    pub async fn bind(
        accessor: Box<dyn MemoryAccessor>,
        pid: u32,
        patches: PatchStore,
        settings: Arc<SettingsRepo>,
    ) -> Result<Arc<Self>> {
        info!("binding emulator process {pid}");
        let memory = tokio::task::spawn_blocking(move || Sm64::attach(accessor)).await??;
        let memory = Arc::new(memory);
        let variant = EmulatorVariant::from_base_address(memory.base_address());
        info!(
            "base address {:#x}, emulator variant {variant}",
            memory.base_address()
        );
        memory.reset_net_compat()?;

        let session = Arc::new(Self {
            pid,
            memory,
            variant,
            patches,
            settings,
            state: Mutex::new(EmulatorState::Connecting),
            tasks: Mutex::new(Vec::new()),
        });
        session.set_state(EmulatorState::Connected);
        session.spawn_watchers();
        Ok(session)
    }

    pub fn state(&self) -> EmulatorState {
        *self.state.lock().unwrap()
    }

    pub fn base_address(&self) -> usize {
        self.memory.base_address()
    }

    pub fn variant(&self) -> EmulatorVariant {
        self.variant
    }

    /// Applies the selected patch sets (all eligible ones when `requested`
    /// is `None`). Sequential and non-cancelable; a payload read failure
    /// aborts the rest, writes already issued stand. No region lock is
    /// taken, so a watcher tick may observe a partially patched state.
    pub async fn patch_memory(&self, requested: Option<&[String]>) -> Result<()> {
        self.set_state(EmulatorState::Patching);
        let result = self.apply_patch_sets(requested);
        self.set_state(match result {
            Ok(()) => EmulatorState::Patched,
            Err(_) => EmulatorState::Connected,
        });
        result
    }

    fn apply_patch_sets(&self, requested: Option<&[String]>) -> Result<()> {
        let sets = self.patches.select_sets(requested, self.variant)?;
        for set in &sets {
            let metadata = self.patches.metadata(set)?;
            for mut payload in self.patches.load_set(set)? {
                if let Some(order) = metadata.byte_order {
                    swap_bytes(&mut payload.data, order);
                }
                self.memory.write(payload.offset, &payload.data)?;
            }
            info!("applied patch set {set:?}");
        }
        Ok(())
    }

    /// Translates one redemption into memory writes. Never fails; a bad
    /// redemption is logged and dropped.
    pub fn execute_effect(&self, title: &str, user_input: Option<&str>) {
        effects::dispatch(&self.memory, title, user_input);
    }

    /// Cancels every watcher subscription. Idempotent and safe to call
    /// concurrently with in-flight watcher ticks.
    pub fn shutdown(&self) {
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        self.set_state(EmulatorState::NotConnected);
    }

    fn set_state(&self, state: EmulatorState) {
        *self.state.lock().unwrap() = state;
    }

    fn spawn_watchers(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(tokio::spawn(Arc::clone(self).watch_frame_counter()));
        tasks.push(tokio::spawn(Arc::clone(self).watch_file_a_flags()));
        tasks.push(tokio::spawn(Arc::clone(self).watch_death_animation()));
        tasks.push(tokio::spawn(Arc::clone(self).watch_liveness()));
    }

    /// Arms on a fresh boot (counter inside the boot window) and fires the
    /// startup actions once the counter passes the stable threshold.
    async fn watch_frame_counter(self: Arc<Self>) {
        let mut watch = watch_bytes(
            Arc::clone(&self.memory),
            offsets::GLOBAL_TIMER,
            4,
            DEFAULT_POLL_INTERVAL,
        );
        let mut armed = false;
        while let Some(change) = watch.changed().await {
            let frame = cell_u32(&change.new_value);
            if frame < BOOT_FRAME_THRESHOLD {
                armed = true;
            } else if armed && frame >= STABLE_FRAME_THRESHOLD {
                armed = false;
                self.on_stable_boot().await;
            }
        }
    }

    async fn on_stable_boot(&self) {
        info!("fresh boot reached a stable frame");
        if self.settings.auto_patch().await {
            if let Err(err) = self.patch_memory(None).await {
                error!("auto-patch failed: {err:#}");
            }
        }
        if self.settings.restore_file_a_flags().await {
            if let Some(flags) = self.settings.saved_file_a_flags().await {
                if let Err(err) = self.memory.put_file_a_flags(&flags) {
                    error!("restoring file A flags failed: {err}");
                }
            }
        }
        if self.settings.skip_intro().await {
            if let Err(err) = self.memory.set_intro_skip() {
                error!("intro skip failed: {err}");
            }
        }
    }

    /// Captures forward progress of the file A flags: a snapshot is
    /// persisted only when it compares greater than the stored one as a
    /// raw byte sequence, so a reset game never clobbers saved progress.
    async fn watch_file_a_flags(self: Arc<Self>) {
        let mut watch = watch_bytes(
            Arc::clone(&self.memory),
            offsets::FILE_A_FLAGS,
            offsets::FILE_A_FLAGS_LEN,
            DEFAULT_POLL_INTERVAL,
        );
        while let Some(change) = watch.changed().await {
            let stored = self.settings.saved_file_a_flags().await;
            if stored
                .as_deref()
                .map_or(true, |stored| change.new_value.as_slice() > stored)
            {
                self.settings.set_saved_file_a_flags(&change.new_value).await;
            }
        }
    }

    /// A star-grab celebration cancels the death countdown.
    async fn watch_death_animation(self: Arc<Self>) {
        let mut watch = watch_bytes(
            Arc::clone(&self.memory),
            offsets::MARIO_ACTION,
            4,
            DEFAULT_POLL_INTERVAL,
        );
        while let Some(change) = watch.changed().await {
            let action = cell_u32(&change.new_value);
            if STAR_GRAB_ACTIONS.contains(&action) {
                if let Err(err) = self.memory.clear_death_timer() {
                    warn!("clearing the death timer failed: {err}");
                }
            }
        }
    }

    async fn watch_liveness(self: Arc<Self>) {
        let mut ticks = interval(LIVENESS_POLL);
        loop {
            ticks.tick().await;
            if !self.memory.is_alive() {
                info!("emulator process {} exited", self.pid);
                self.shutdown();
                break;
            }
        }
    }
}

fn cell_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes.try_into().unwrap())
}
