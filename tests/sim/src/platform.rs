use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use psci_mp_services::{
    platform::{
        CoreIdentity, EventHandle, EventService, MemoryAttributes, PageAllocator,
        PowerCoordinator, Timer, TopologySource, WakeBroadcast,
    },
    psci::{
        AffinityState, Conduit, Psci, PsciReturn, SmcArgs, PSCI_AFFINITY_INFO_AARCH64,
        PSCI_AFFINITY_INFO_OFF, PSCI_AFFINITY_INFO_ON, PSCI_AFFINITY_INFO_ON_PENDING,
        PSCI_CPU_ON_AARCH64, PSCI_RET_ALREADY_ON, PSCI_RET_DENIED, PSCI_RET_INVALID_PARAMETERS,
        PSCI_RET_NOT_SUPPORTED, PSCI_RET_ON_PENDING, PSCI_RET_SUCCESS,
    },
    topology::CoreCoordinate,
    MpError, Result,
};

use crate::{
    cpu::{self, SgiLine},
    events::EventTable,
    memory::MemoryPool,
};

/// State shared between the platform handle and the simulated processors.
pub(crate) struct Shared {
    table: Vec<CoreCoordinate>,
    missing_table: bool,
    primary: CoreCoordinate,
    pub(crate) boot_delay: Duration,
    power: Mutex<HashMap<CoreCoordinate, AffinityState>>,
    deny_cpu_on: AtomicBool,
    cpu_on_calls: AtomicUsize,
    broadcasts: AtomicUsize,
    faults: Mutex<Vec<String>>,
    pub(crate) sgi: SgiLine,
    pub(crate) events: EventTable,
    pub(crate) memory: MemoryPool,
    started: Instant,
}

impl Shared {
    pub(crate) fn set_power(&self, coordinate: CoreCoordinate, state: AffinityState) {
        self.power.lock().unwrap().insert(coordinate, state);
    }

    pub(crate) fn fault(&self, message: String) {
        log::error!("{}", message);
        self.faults.lock().unwrap().push(message);
    }

    fn affinity_info(&self, coordinate: CoreCoordinate) -> i64 {
        match self.power.lock().unwrap().get(&coordinate) {
            Some(AffinityState::On) => PSCI_AFFINITY_INFO_ON,
            Some(AffinityState::Off) => PSCI_AFFINITY_INFO_OFF,
            Some(AffinityState::OnPending) => PSCI_AFFINITY_INFO_ON_PENDING,
            Some(AffinityState::Other(raw)) => *raw,
            None => PSCI_RET_INVALID_PARAMETERS,
        }
    }

    fn cpu_on(self: &Arc<Self>, coordinate: CoreCoordinate, entry: usize) -> i64 {
        self.cpu_on_calls.fetch_add(1, Ordering::Relaxed);
        if self.deny_cpu_on.load(Ordering::Relaxed) {
            return PSCI_RET_DENIED;
        }

        let mut power = self.power.lock().unwrap();
        match power.get(&coordinate) {
            None => PSCI_RET_INVALID_PARAMETERS,
            Some(AffinityState::On) => PSCI_RET_ALREADY_ON,
            Some(AffinityState::OnPending) => PSCI_RET_ON_PENDING,
            Some(_) => {
                power.insert(coordinate, AffinityState::OnPending);
                let shared = self.clone();
                thread::Builder::new()
                    .name(format!("cpu{}", coordinate))
                    .spawn(move || cpu::run(shared, coordinate, entry))
                    .unwrap();
                PSCI_RET_SUCCESS
            }
        }
    }
}

/// Firmware side of the PSCI conduit.
pub struct SimFirmware {
    shared: Arc<Shared>,
}

impl Conduit for SimFirmware {
    fn call(&self, args: &mut SmcArgs) {
        let target = CoreCoordinate::from_mpidr(args.arg1);
        let ret = match args.arg0 as u32 {
            PSCI_AFFINITY_INFO_AARCH64 => self.shared.affinity_info(target),
            PSCI_CPU_ON_AARCH64 => self.shared.cpu_on(target, args.arg2 as usize),
            _ => PSCI_RET_NOT_SUPPORTED,
        };
        args.arg0 = ret as u64;
    }
}

/// Machine with one thread per powered-on secondary processor.
///
/// Threads not started by the simulation run as the primary, unless inside
/// [`run_as`](SimPlatform::run_as).
pub struct SimPlatform {
    shared: Arc<Shared>,
    psci: Psci<SimFirmware>,
}

impl SimPlatform {
    pub fn builder() -> SimBuilder {
        SimBuilder::default()
    }

    /// `count` processors in cluster 0, the first one being the primary.
    pub fn with_cores(count: u8) -> Self {
        Self::builder().cores(count).build()
    }

    pub fn coordinates(&self) -> &[CoreCoordinate] {
        &self.shared.table
    }

    pub fn primary_coordinate(&self) -> CoreCoordinate {
        self.shared.primary
    }

    pub fn power_state(&self, coordinate: CoreCoordinate) -> Option<AffinityState> {
        self.shared.power.lock().unwrap().get(&coordinate).copied()
    }

    /// Runs `f` on a thread that identifies as `coordinate`.
    pub fn run_as<R: Send>(&self, coordinate: CoreCoordinate, f: impl FnOnce() -> R + Send) -> R {
        thread::scope(|scope| {
            scope
                .spawn(move || {
                    cpu::set_current_coordinate(Some(coordinate));
                    f()
                })
                .join()
                .unwrap()
        })
    }

    pub fn deny_cpu_on(&self, deny: bool) {
        self.shared.deny_cpu_on.store(deny, Ordering::Relaxed);
    }

    pub fn fail_allocations(&self, fail: bool) {
        self.shared.memory.set_fail_allocation(fail);
    }

    pub fn fail_memory_attributes(&self, fail: bool) {
        self.shared.memory.set_fail_attributes(fail);
    }

    pub fn fail_event_creation(&self, fail: bool) {
        self.shared.events.set_fail_create(fail);
    }

    pub fn allocations(&self) -> usize {
        self.shared.memory.allocations()
    }

    pub fn live_regions(&self) -> usize {
        self.shared.memory.live_regions()
    }

    pub fn attributes_of(&self, base: usize) -> Option<MemoryAttributes> {
        self.shared.memory.attributes_of(base)
    }

    pub fn open_events(&self) -> usize {
        self.shared.events.open_count()
    }

    pub fn closed_events(&self) -> usize {
        self.shared.events.closed_count()
    }

    pub fn cpu_on_calls(&self) -> usize {
        self.shared.cpu_on_calls.load(Ordering::Relaxed)
    }

    pub fn broadcasts(&self) -> usize {
        self.shared.broadcasts.load(Ordering::Relaxed)
    }

    /// Problems the simulated processors ran into, such as a missing stub.
    pub fn faults(&self) -> Vec<String> {
        self.shared.faults.lock().unwrap().clone()
    }
}

impl Drop for SimPlatform {
    fn drop(&mut self) {
        // parked processors leave their loop, the last one releases the memory
        self.shared.sgi.shutdown();
    }
}

impl TopologySource for SimPlatform {
    fn processor_table(&self) -> Result<Vec<CoreCoordinate>> {
        if self.shared.missing_table {
            return Err(MpError::NotFound);
        }
        Ok(self.shared.table.clone())
    }
}

impl CoreIdentity for SimPlatform {
    fn current_mpidr(&self) -> u64 {
        let coordinate = cpu::current_coordinate().unwrap_or(self.shared.primary);
        // bit 31 is RES1
        (1 << 31) | coordinate.mpid()
    }
}

impl PowerCoordinator for SimPlatform {
    fn affinity_info(&self, target: CoreCoordinate) -> AffinityState {
        self.psci.affinity_info(target)
    }

    fn cpu_on(&self, target: CoreCoordinate, entry_point: usize, context: u64) -> PsciReturn {
        self.psci.cpu_on(target, entry_point, context)
    }
}

impl WakeBroadcast for SimPlatform {
    fn broadcast_to_others(&self) {
        self.shared.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.shared.sgi.raise();
    }
}

impl EventService for SimPlatform {
    fn create_event(&self) -> Result<EventHandle> {
        self.shared.events.create()
    }

    fn signal_event(&self, event: EventHandle) {
        self.shared.events.signal(event)
    }

    fn wait_event(&self, events: &[EventHandle]) -> usize {
        self.shared.events.wait(events)
    }

    fn check_event(&self, event: EventHandle) -> bool {
        self.shared.events.check(event)
    }

    fn close_event(&self, event: EventHandle) {
        self.shared.events.close(event)
    }
}

impl PageAllocator for SimPlatform {
    fn allocate_pages(&self, pages: usize) -> Result<usize> {
        self.shared.memory.allocate(pages)
    }

    unsafe fn free_pages(&self, base: usize, pages: usize) {
        self.shared.memory.free(base, pages)
    }

    fn set_memory_attributes(
        &self,
        base: usize,
        length: usize,
        attributes: MemoryAttributes,
    ) -> Result<()> {
        self.shared.memory.set_attributes(base, length, attributes)
    }
}

impl Timer for SimPlatform {
    fn stall(&self, micros: u64) {
        thread::sleep(Duration::from_micros(micros));
    }

    fn now_micros(&self) -> u64 {
        self.shared.started.elapsed().as_micros() as u64
    }
}

#[derive(Default)]
pub struct SimBuilder {
    table: Vec<CoreCoordinate>,
    primary: Option<CoreCoordinate>,
    missing_table: bool,
    stuck_pending: HashSet<CoreCoordinate>,
    boot_delay: Duration,
}

impl SimBuilder {
    /// Processors `0.0` to `0.{count - 1}`.
    pub fn cores(mut self, count: u8) -> Self {
        self.table = (0..count).map(|core| CoreCoordinate::new(0, core)).collect();
        self
    }

    /// `clusters` clusters of `per_cluster` processors each, listed cluster by cluster.
    pub fn clusters(mut self, clusters: u8, per_cluster: u8) -> Self {
        self.table = (0..clusters)
            .flat_map(|cluster| (0..per_cluster).map(move |core| CoreCoordinate::new(cluster, core)))
            .collect();
        self
    }

    pub fn table(mut self, table: Vec<CoreCoordinate>) -> Self {
        self.table = table;
        self
    }

    /// Defaults to the first table entry.
    pub fn primary(mut self, primary: CoreCoordinate) -> Self {
        self.primary = Some(primary);
        self
    }

    /// The platform publishes no processor table.
    pub fn missing_table(mut self) -> Self {
        self.missing_table = true;
        self
    }

    /// The processor reports `ON_PENDING` forever.
    pub fn stuck_pending(mut self, coordinate: CoreCoordinate) -> Self {
        self.stuck_pending.insert(coordinate);
        self
    }

    /// Delay between `CPU_ON` and the processor reaching its stub.
    pub fn boot_delay(mut self, delay: Duration) -> Self {
        self.boot_delay = delay;
        self
    }

    pub fn build(self) -> SimPlatform {
        let primary = self
            .primary
            .or_else(|| self.table.first().copied())
            .unwrap_or(CoreCoordinate::new(0, 0));

        let power = self
            .table
            .iter()
            .map(|&coordinate| {
                let state = if coordinate == primary {
                    AffinityState::On
                } else if self.stuck_pending.contains(&coordinate) {
                    AffinityState::OnPending
                } else {
                    AffinityState::Off
                };
                (coordinate, state)
            })
            .collect();

        let shared = Arc::new(Shared {
            table: self.table,
            missing_table: self.missing_table,
            primary,
            boot_delay: self.boot_delay,
            power: Mutex::new(power),
            deny_cpu_on: AtomicBool::new(false),
            cpu_on_calls: AtomicUsize::new(0),
            broadcasts: AtomicUsize::new(0),
            faults: Mutex::new(Vec::new()),
            sgi: SgiLine::default(),
            events: EventTable::default(),
            memory: MemoryPool::default(),
            started: Instant::now(),
        });
        SimPlatform {
            psci: Psci::new(SimFirmware {
                shared: shared.clone(),
            }),
            shared,
        }
    }
}
