use std::sync::Arc;

use psci_mp_services::{DispatchRequest, MpError, MpServices, MultiProcessor};
use psci_mp_tests_sim::{logger, test_config, ExecutionLog, SimPlatform};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let debug: bool = args.contains(&String::from("-d")) || args.contains(&String::from("--debug"));

    logger::init(if debug {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    });
    log::info!("psci_mp runner built {}", build_time::build_time_utc!());

    let status = match run() {
        Ok(()) => 0,
        Err(e) => {
            log::error!("{}", e);
            1
        }
    };
    std::process::exit(status);
}

/// One primary and three secondaries, of which the first two get enabled.
fn run() -> Result<(), MpError> {
    let platform = Arc::new(SimPlatform::with_cores(4));
    let services = MpServices::new(platform.clone(), test_config())?;

    for handle in [1, 2] {
        services.enable_disable_ap(handle, true, None)?;
    }
    print_processors(&services)?;

    let log = ExecutionLog::new();
    let request = DispatchRequest::new(ExecutionLog::record, log.argument());

    services.startup_all_aps(&request.sequential(), None)?;
    log::info!("sequential: {:?}", log.drain());

    services.startup_all_aps(&request, None)?;
    log::info!("concurrent: {:?}", log.drain());

    services.startup_this_ap(2, &request, None)?;
    log::info!("processor 2 alone: {:?}", log.drain());

    for fault in platform.faults() {
        log::warn!("{}", fault);
    }
    Ok(())
}

fn print_processors(services: &MpServices<SimPlatform>) -> Result<(), MpError> {
    let count = services.processor_count();
    println!("{} processors, {} enabled", count.total, count.enabled);
    for handle in 0..count.total {
        let info = services.processor_info(handle)?;
        println!(
            "  #{} mpid 0x{:03x} bsp={} enabled={} healthy={}",
            handle,
            info.processor_id,
            info.is_bsp(),
            info.is_enabled(),
            info.is_healthy()
        );
    }
    Ok(())
}
