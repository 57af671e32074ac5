//! Wiring: one place that builds every service over shared collaborators.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::availability::AvailabilityService;
use crate::clock::Clock;
use crate::config::Config;
use crate::recalc::{ChannelQueue, RecalcReceiver, SlotGenerator, run_worker};
use crate::reconcile::ScheduleReconciler;
use crate::reservation::ReservationService;
use crate::schedule::{InMemoryAppointments, InMemoryCalendar};
use crate::sweeper;
use crate::tenant::TenantManager;

pub struct Platform {
    pub config: Config,
    pub tenants: Arc<TenantManager>,
    pub appointments: Arc<InMemoryAppointments>,
    pub calendar: Arc<InMemoryCalendar>,
    pub queue: Arc<ChannelQueue>,
    pub generator: Arc<SlotGenerator>,
    pub availability: AvailabilityService,
    pub reservations: ReservationService,
    pub reconciler: ScheduleReconciler,
    cancel: CancellationToken,
}

impl Platform {
    /// Build the services. Nothing runs until [`Platform::start`] is called
    /// with the returned receiver.
    pub fn new(config: Config, clock: Arc<dyn Clock>, cancel: CancellationToken) -> (Self, RecalcReceiver) {
        let tenants = Arc::new(TenantManager::new(
            config.data_dir.clone(),
            config.tenant_settings(),
            clock,
            cancel.clone(),
        ));
        let appointments = Arc::new(InMemoryAppointments::new());
        let calendar = Arc::new(InMemoryCalendar::new());
        let (queue, receiver) = ChannelQueue::new(config.recalc_queue_capacity);
        let queue = Arc::new(queue);

        let generator = Arc::new(SlotGenerator::new(
            tenants.clone(),
            appointments.clone(),
            calendar.clone(),
            calendar.clone(),
            config.slot_len_ms,
            config.horizon_ms,
        ));
        let availability = AvailabilityService::new(tenants.clone(), appointments.clone(), calendar.clone());
        let reservations = ReservationService::new(tenants.clone(), appointments.clone(), queue.clone());
        let reconciler = ScheduleReconciler::new(tenants.clone(), appointments.clone(), queue.clone());

        let platform = Self {
            config,
            tenants,
            appointments,
            calendar,
            queue,
            generator,
            availability,
            reservations,
            reconciler,
            cancel,
        };
        (platform, receiver)
    }

    /// Spawn the recalculation worker and the scheduled full recalculation.
    /// Both stop when the platform's cancellation token fires.
    pub fn start(&self, receiver: RecalcReceiver) -> Vec<JoinHandle<()>> {
        info!(
            "recalculation: {} min slots over {} days, full pass every {:?}",
            self.config.slot_len_ms / crate::limits::MINUTE_MS,
            self.config.horizon_ms / crate::limits::DAY_MS,
            self.config.full_recalc_interval
        );
        vec![
            tokio::spawn(run_worker(
                receiver,
                self.generator.clone(),
                self.config.recalc_backoff,
                self.cancel.child_token(),
            )),
            tokio::spawn(sweeper::run_full_recalc(
                self.tenants.clone(),
                self.calendar.clone(),
                self.queue.clone(),
                self.config.full_recalc_interval,
                self.cancel.child_token(),
            )),
        ]
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
