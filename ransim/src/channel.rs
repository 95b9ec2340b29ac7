use rlc::{
    BufferStatusReport, MacSapProvider, ReceivePduParams, RlcUm, TransmitPduParams,
};
use sim::Scheduler;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// An ideal MAC link: every PDU arrives intact at the peer entity after a
/// fixed one-way delay.  Buffer status reports are retained for inspection,
/// standing in for a MAC scheduler.
#[derive(Clone)]
pub struct MacChannel {
    inner: Rc<RefCell<Inner>>,
}

struct Inner {
    scheduler: Scheduler,
    delay: Duration,
    peer: Option<RlcUm>,
    forwarded_pdus: u64,
    last_report: Option<BufferStatusReport>,
}

impl MacChannel {
    pub fn new(scheduler: &Scheduler, delay: Duration) -> Self {
        MacChannel {
            inner: Rc::new(RefCell::new(Inner {
                scheduler: scheduler.clone(),
                delay,
                peer: None,
                forwarded_pdus: 0,
                last_report: None,
            })),
        }
    }

    /// Attach the receiving entity.  PDUs sent before this point are lost.
    pub fn connect(&self, peer: RlcUm) {
        self.inner.borrow_mut().peer = Some(peer);
    }

    pub fn forwarded_pdus(&self) -> u64 {
        self.inner.borrow().forwarded_pdus
    }

    pub fn last_buffer_status(&self) -> Option<BufferStatusReport> {
        self.inner.borrow().last_report
    }
}

impl MacSapProvider for MacChannel {
    fn transmit_pdu(&self, params: TransmitPduParams) {
        let mut inner = self.inner.borrow_mut();
        let Some(peer) = inner.peer.clone() else {
            return;
        };
        inner.forwarded_pdus += 1;
        let rx = ReceivePduParams {
            packet: params.pdu,
            rnti: params.rnti,
            lcid: params.lcid,
        };
        inner.scheduler.schedule(inner.delay, move || peer.receive_pdu(rx));
    }

    fn report_buffer_status(&self, report: BufferStatusReport) {
        self.inner.borrow_mut().last_report = Some(report);
    }
}
