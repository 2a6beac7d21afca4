use super::ProcessorRecord;
use crate::platform::Platform;

/// Jump target posted into the mailbox, called by the parking stub as
/// `secondary_entry(context, processor_id)`.
///
/// `context` is the address of the processor's record in the services that posted it.
pub(crate) extern "C" fn secondary_entry<P: Platform>(context: usize, processor_id: u32) {
    // SAFETY: only `MpServices::arm` posts this function, together with the address of a
    // record that lives as long as the services
    let record = unsafe { &*(context as *const ProcessorRecord<P>) };
    run_parked_work(record, processor_id);
}

fn run_parked_work<P: Platform>(record: &ProcessorRecord<P>, processor_id: u32) {
    // the primary may have recalled the work before this processor got to it
    let Some(work) = record.work.lock().take() else {
        #[cfg(feature = "dbg-dispatch")]
        log::trace!("processor {} woke up without work", processor_id);
        return;
    };
    debug_assert_eq!(record.handle, processor_id as usize);

    #[cfg(feature = "dbg-dispatch")]
    log::trace!("processor {} running work", processor_id);

    (work.procedure)(work.argument);

    // the record may be gone from here on, only `work` is used
    work.mailbox.clear_jump();
    work.completion.complete();
}
