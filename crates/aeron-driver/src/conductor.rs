//! The driver conductor: the single-threaded duty cycle that owns every
//! resource registry and is the only thing that ever mutates them. Clients
//! only ever reach it through the [`CommandRingBuffer`]; everything it
//! produces for them comes back as a [`DriverResponse`].
//!
//! Grounded on the teacher's single-threaded server loop shape (drain
//! inbound work, advance per-connection state, sweep timers) generalized
//! from "one socket per connection" to "one log buffer per publication".

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use tracing::{ debug, info, warn };

use aeron_log_buffer::LogBuffer;
use aeron_protocol::command::{
    AddPublicationCommand,
    AddSubscriptionCommand,
    ClientKeepaliveCommand,
    ErrorResponse,
    ImageNotification,
    OperationSucceeded,
    PublicationReady,
    RemovePublicationCommand,
    RemoveSubscriptionCommand,
    SubscriptionReady,
};
use aeron_ipc::{ Image, IpcPublication, PublicationEvent, PublicationState, PublicationTimeouts };

use crate::command_ring::{ CommandRingBuffer, DriverCommand };
use crate::context::DriverContext;
use crate::counters::{ CountersManager, SystemCounters };
use crate::error::{ AeronError, Result };
use crate::session_id::SessionIdAllocator;

/// Everything the conductor can hand back to clients in a duty cycle: either
/// a direct reply to a command they submitted, or an asynchronous
/// notification triggered by a timer sweep.
#[derive(Debug, Clone)]
pub enum DriverResponse {
    PublicationReady(PublicationReady),
    SubscriptionReady(SubscriptionReady),
    AvailableImage(ImageNotification),
    UnavailableImage { correlation_id: i64, subscriber_registration_id: i64 },
    OperationSucceeded(OperationSucceeded),
    Error(ErrorResponse),
}

struct PublicationEntry {
    publication: IpcPublication,
    log_file_name: String,
    client_id: i64,
}

struct SubscriptionEntry {
    registration_id: i64,
    client_id: i64,
    stream_id: i32,
    is_tether: bool,
}

struct ImageEntry {
    image: Image,
    publication_registration_id: i64,
    subscription_registration_id: i64,
}

struct ClientEntry {
    client_id: i64,
    last_keepalive_ns: i64,
}

pub struct DriverConductor {
    context: DriverContext,
    counters: CountersManager,
    system_counters: SystemCounters,
    command_ring: Arc<CommandRingBuffer>,

    publications: Vec<PublicationEntry>,
    subscriptions: Vec<SubscriptionEntry>,
    images: Vec<ImageEntry>,
    clients: Vec<ClientEntry>,

    session_ids: SessionIdAllocator,
    active_sessions: HashSet<(i32, i32)>,
    next_registration_id: i64,
    last_timer_ns: i64,
    command_ring_blocked_since_ns: Option<i64>,
}

impl DriverConductor {
    pub fn new(context: DriverContext) -> Result<Self> {
        fs::create_dir_all(context.publications_dir())?;
        let counters = CountersManager::new();
        let system_counters = SystemCounters::new(&counters);
        let command_ring = Arc::new(CommandRingBuffer::new(context.command_ring_capacity));
        let session_ids = SessionIdAllocator::new(
            context.publication_reserved_session_id_high.wrapping_add(1),
            context.publication_reserved_session_id_low,
            context.publication_reserved_session_id_high
        );

        Ok(Self {
            context,
            counters,
            system_counters,
            command_ring,
            publications: Vec::new(),
            subscriptions: Vec::new(),
            images: Vec::new(),
            clients: Vec::new(),
            session_ids,
            active_sessions: HashSet::new(),
            next_registration_id: 1,
            last_timer_ns: 0,
            command_ring_blocked_since_ns: None,
        })
    }

    pub fn command_ring(&self) -> Arc<CommandRingBuffer> {
        self.command_ring.clone()
    }

    pub fn counters(&self) -> &CountersManager {
        &self.counters
    }

    fn allocate_registration_id(&mut self) -> i64 {
        let id = self.next_registration_id;
        self.next_registration_id += 1;
        id
    }

    fn timeouts(&self) -> PublicationTimeouts {
        PublicationTimeouts {
            unblock_timeout_ns: self.context.publication_unblock_timeout_ns,
            untethered_window_limit_timeout_ns: self.context.untethered_window_limit_timeout_ns,
            untethered_resting_timeout_ns: self.context.untethered_resting_timeout_ns,
            linger_timeout_ns: self.context.publication_linger_timeout_ns,
        }
    }

    fn touch_client(&mut self, client_id: i64, now_ns: i64) {
        match self.clients.iter_mut().find(|c| c.client_id == client_id) {
            Some(entry) => entry.last_keepalive_ns = now_ns,
            None => self.clients.push(ClientEntry { client_id, last_keepalive_ns: now_ns }),
        }
    }

    // -- command handlers ---------------------------------------------------

    fn on_add_publication(&mut self, cmd: AddPublicationCommand, now_ns: i64) -> Result<Vec<DriverResponse>> {
        self.touch_client(cmd.client_id, now_ns);

        let session_id = match cmd.session_id {
            Some(requested) => {
                if !self.session_ids.validate_requested(&self.active_sessions, requested, cmd.stream_id) {
                    return Err(AeronError::SessionIdClash { session_id: requested, stream_id: cmd.stream_id });
                }
                requested
            }
            None => self.session_ids.allocate(&self.active_sessions, cmd.stream_id),
        };

        let registration_id = self.allocate_registration_id();
        let path = self.context.publications_dir().join(format!("{registration_id}.logbuffer"));
        let log = Arc::new(
            LogBuffer::create(
                &path,
                self.context.term_length,
                0,
                self.context.mtu_length,
                session_id,
                cmd.stream_id,
                cmd.correlation_id
            )?
        );

        let publication = IpcPublication::new(
            log.clone(),
            registration_id,
            session_id,
            cmd.stream_id,
            cmd.is_exclusive,
            self.context.ipc_publication_term_window_length,
            self.timeouts()
        );

        self.active_sessions.insert((session_id, cmd.stream_id));
        let log_file_name = path.display().to_string();

        let mut responses = vec![
            DriverResponse::PublicationReady(PublicationReady {
                correlation_id: cmd.correlation_id,
                registration_id,
                session_id,
                stream_id: cmd.stream_id,
                log_file_name: log_file_name.clone(),
            })
        ];

        self.publications.push(PublicationEntry { publication, log_file_name: log_file_name.clone(), client_id: cmd.client_id });

        let matching_subs: Vec<(i64, bool)> = self.subscriptions
            .iter()
            .filter(|s| s.stream_id == cmd.stream_id)
            .map(|s| (s.registration_id, s.is_tether))
            .collect();

        let pub_entry = self.publications.last_mut().expect("just pushed");
        for (sub_registration_id, is_tether) in matching_subs {
            let position = pub_entry.publication.add_subscriber(sub_registration_id, is_tether, now_ns);
            let image = Image::new(log.clone(), session_id, cmd.stream_id, sub_registration_id, position);
            self.images.push(ImageEntry {
                image,
                publication_registration_id: registration_id,
                subscription_registration_id: sub_registration_id,
            });
            responses.push(
                DriverResponse::AvailableImage(ImageNotification {
                    correlation_id: 0,
                    subscription_registration_id: sub_registration_id,
                    session_id,
                    stream_id: cmd.stream_id,
                    log_file_name: log_file_name.clone(),
                })
            );
        }

        Ok(responses)
    }

    fn on_remove_publication(&mut self, cmd: RemovePublicationCommand, now_ns: i64) -> Result<Vec<DriverResponse>> {
        self.touch_client(cmd.client_id, now_ns);
        let entry = self.publications
            .iter_mut()
            .find(|p| p.publication.registration_id == cmd.registration_id)
            .ok_or(AeronError::UnknownPublication(cmd.registration_id))?;
        entry.publication.decref();
        Ok(vec![DriverResponse::OperationSucceeded(OperationSucceeded { correlation_id: cmd.correlation_id })])
    }

    fn on_add_subscription(&mut self, cmd: AddSubscriptionCommand, now_ns: i64) -> Result<Vec<DriverResponse>> {
        self.touch_client(cmd.client_id, now_ns);
        let registration_id = self.allocate_registration_id();

        let mut responses = vec![DriverResponse::SubscriptionReady(SubscriptionReady { correlation_id: cmd.correlation_id })];

        for entry in self.publications.iter_mut().filter(|p| p.publication.stream_id == cmd.stream_id && p.publication.state == PublicationState::Active) {
            let position = entry.publication.add_subscriber(registration_id, cmd.is_tether, now_ns);
            let image = Image::new(
                entry.publication.log.clone(),
                entry.publication.session_id,
                cmd.stream_id,
                registration_id,
                position
            );
            self.images.push(ImageEntry {
                image,
                publication_registration_id: entry.publication.registration_id,
                subscription_registration_id: registration_id,
            });
            responses.push(
                DriverResponse::AvailableImage(ImageNotification {
                    correlation_id: cmd.correlation_id,
                    subscription_registration_id: registration_id,
                    session_id: entry.publication.session_id,
                    stream_id: cmd.stream_id,
                    log_file_name: entry.log_file_name.clone(),
                })
            );
        }

        self.subscriptions.push(SubscriptionEntry {
            registration_id,
            client_id: cmd.client_id,
            stream_id: cmd.stream_id,
            is_tether: cmd.is_tether,
        });

        Ok(responses)
    }

    fn on_remove_subscription(&mut self, cmd: RemoveSubscriptionCommand, now_ns: i64) -> Result<Vec<DriverResponse>> {
        self.touch_client(cmd.client_id, now_ns);
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.registration_id != cmd.registration_id);
        if self.subscriptions.len() == before {
            return Err(AeronError::UnknownSubscription(cmd.registration_id));
        }

        let removed_images: Vec<i64> = self.images
            .iter()
            .filter(|i| i.subscription_registration_id == cmd.registration_id)
            .map(|i| i.publication_registration_id)
            .collect();
        self.images.retain(|i| i.subscription_registration_id != cmd.registration_id);
        for pub_registration_id in removed_images {
            if let Some(entry) = self.publications.iter_mut().find(|p| p.publication.registration_id == pub_registration_id) {
                entry.publication.remove_subscriber(cmd.registration_id);
            }
        }

        Ok(vec![DriverResponse::OperationSucceeded(OperationSucceeded { correlation_id: cmd.correlation_id })])
    }

    fn on_client_keepalive(&mut self, cmd: ClientKeepaliveCommand, now_ns: i64) {
        self.touch_client(cmd.client_id, now_ns);
    }

    fn dispatch(&mut self, command: DriverCommand, now_ns: i64) -> Vec<DriverResponse> {
        let (correlation_id, result) = match command {
            DriverCommand::AddIpcPublication(cmd) => (cmd.correlation_id, self.on_add_publication(cmd, now_ns)),
            DriverCommand::RemovePublication(cmd) => (cmd.correlation_id, self.on_remove_publication(cmd, now_ns)),
            DriverCommand::AddIpcSubscription(cmd) => (cmd.correlation_id, self.on_add_subscription(cmd, now_ns)),
            DriverCommand::RemoveSubscription(cmd) => (cmd.correlation_id, self.on_remove_subscription(cmd, now_ns)),
            DriverCommand::ClientKeepalive(cmd) => {
                self.on_client_keepalive(cmd, now_ns);
                return Vec::new();
            }
        };

        match result {
            Ok(responses) => responses,
            Err(err) => {
                self.system_counters.errors.fetch_add_ordered(1);
                warn!(%err, "command failed");
                vec![
                    DriverResponse::Error(ErrorResponse {
                        offending_correlation_id: correlation_id,
                        error_code: err.to_error_code(),
                        message: err.to_string(),
                    })
                ]
            }
        }
    }

    // -- timer sweeps ---------------------------------------------------

    fn sweep_publications(&mut self, now_ns: i64) -> Vec<DriverResponse> {
        let mut responses = Vec::new();

        for entry in &mut self.publications {
            entry.publication.update_publisher_limit();

            if let Some((partition_index, term_offset)) = entry.publication.check_blocked_producer(now_ns) {
                if entry.publication.log.unblock(partition_index, term_offset) {
                    self.system_counters.unblocked_publications.fetch_add_ordered(1);
                    info!(registration_id = entry.publication.registration_id, "unblocked stalled producer");
                }
            }

            for event in entry.publication.on_time_event(now_ns) {
                match event {
                    PublicationEvent::UnavailableImage { subscriber_registration_id } => {
                        responses.push(DriverResponse::UnavailableImage { correlation_id: 0, subscriber_registration_id });
                    }
                    PublicationEvent::AvailableImage { subscriber_registration_id } => {
                        responses.push(
                            DriverResponse::AvailableImage(ImageNotification {
                                correlation_id: 0,
                                subscription_registration_id: subscriber_registration_id,
                                session_id: entry.publication.session_id,
                                stream_id: entry.publication.stream_id,
                                log_file_name: entry.log_file_name.clone(),
                            })
                        );
                    }
                }
            }
        }

        responses
    }

    fn free_expired_publications(&mut self, now_ns: i64) {
        let mut i = self.publications.len();
        while i > 0 {
            i -= 1;
            if self.publications[i].publication.has_reached_end_of_life(now_ns) {
                let entry = self.publications.swap_remove(i);
                self.active_sessions.remove(&(entry.publication.session_id, entry.publication.stream_id));
                self.images.retain(|img| img.publication_registration_id != entry.publication.registration_id);
                if let Err(err) = fs::remove_file(&entry.log_file_name) {
                    self.system_counters.free_fails.fetch_add_ordered(1);
                    warn!(path = %entry.log_file_name, %err, "failed to remove log buffer file");
                }
                debug!(registration_id = entry.publication.registration_id, "freed publication");
            }
        }
    }

    fn sweep_clients(&mut self, now_ns: i64) {
        let timeout = self.context.client_liveness_timeout_ns;
        let mut timed_out = Vec::new();
        self.clients.retain(|c| {
            let alive = now_ns - c.last_keepalive_ns < timeout;
            if !alive {
                timed_out.push(c.client_id);
            }
            alive
        });

        for client_id in timed_out {
            self.system_counters.client_timeouts.fetch_add_ordered(1);
            warn!(client_id, "client liveness timeout; releasing its resources");
            for entry in self.publications.iter_mut().filter(|p| p.client_id == client_id) {
                entry.publication.decref();
            }
            self.subscriptions.retain(|s| s.client_id != client_id);
        }
    }

    fn sweep_command_ring(&mut self, now_ns: i64) {
        if self.command_ring.is_blocked() {
            let since = *self.command_ring_blocked_since_ns.get_or_insert(now_ns);
            if now_ns - since >= self.context.publication_unblock_timeout_ns && self.command_ring.unblock() {
                self.system_counters.unblocked_commands.fetch_add_ordered(1);
                self.command_ring_blocked_since_ns = None;
                warn!("unblocked a stalled command ring slot");
            }
        } else {
            self.command_ring_blocked_since_ns = None;
        }
    }

    /// One iteration of the duty cycle: drain commands, advance flow
    /// control, and - once per `timer_interval_ns` - run the timer sweeps.
    pub fn duty_cycle(&mut self, now_ns: i64) -> Vec<DriverResponse> {
        let mut responses = Vec::new();

        let ring = self.command_ring.clone();
        let mut pending = Vec::new();
        ring.drain(16, |cmd| pending.push(cmd));
        for cmd in pending {
            responses.extend(self.dispatch(cmd, now_ns));
        }

        if now_ns - self.last_timer_ns >= self.context.timer_interval_ns {
            self.last_timer_ns = now_ns;
            responses.extend(self.sweep_publications(now_ns));
            self.free_expired_publications(now_ns);
            self.sweep_clients(now_ns);
            self.sweep_command_ring(now_ns);
        }

        responses
    }

    /// Poll every image registered for `subscription_registration_id`.
    /// Exists for tests and benchmarks driving the conductor directly, in
    /// lieu of a client-side `Subscription` wrapper (out of scope here).
    pub fn poll_image(
        &mut self,
        subscription_registration_id: i64,
        mut handler: impl FnMut(&[u8], &aeron_protocol::frame::FrameHeader),
        fragment_limit: usize
    ) -> usize {
        self.images
            .iter_mut()
            .filter(|i| i.subscription_registration_id == subscription_registration_id)
            .map(|i| i.image.poll(&mut handler, fragment_limit))
            .sum()
    }

    pub fn publisher_limit(&self, publication_registration_id: i64) -> Option<i64> {
        self.publications
            .iter()
            .find(|p| p.publication.registration_id == publication_registration_id)
            .map(|p| p.publication.publisher_limit())
    }

    pub fn publication_count(&self) -> usize {
        self.publications.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }
}
