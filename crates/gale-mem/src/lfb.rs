//! Linear-framebuffer / MMIO window management.
//!
//! The display device owns one power-of-two-aligned window for its
//! framebuffer and, optionally, a fixed 16-page register window 16 MiB past
//! the framebuffer base. Both are ordinary callouts, so their conflict and
//! caching behavior is identical to any other device on the bus.

use std::rc::Rc;

use gale_pc_constants::{LFB_MMIO_OFFSET_PAGES, LFB_MMIO_PAGES};
use tracing::error;

use crate::callout::{BusClass, CalloutError, CalloutId, MemMask};
use crate::handler::HandlerRef;
use crate::space::{AddressSpace, BusTopology};

pub(crate) struct LfbWindow {
    start_page: u32,
    pages: u32,
    handler: Option<HandlerRef>,
    mmio_handler: Option<HandlerRef>,
    window_id: Option<CalloutId>,
    mmio_id: Option<CalloutId>,
}

impl LfbWindow {
    pub(crate) fn new() -> Self {
        Self {
            start_page: 0,
            pages: 0,
            handler: None,
            mmio_handler: None,
            window_id: None,
            mmio_id: None,
        }
    }

    fn same_parameters(
        &self,
        start_page: u32,
        pages: u32,
        handler: &Option<HandlerRef>,
        mmio_handler: &Option<HandlerRef>,
    ) -> bool {
        self.start_page == start_page
            && self.pages == pages
            && same_opt_handler(&self.handler, handler)
            && same_opt_handler(&self.mmio_handler, mmio_handler)
    }
}

fn same_opt_handler(a: &Option<HandlerRef>, b: &Option<HandlerRef>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
        _ => false,
    }
}

impl AddressSpace {
    /// Moves the display device's linear framebuffer (and its companion MMIO
    /// register window) to a new location, or disables it with `pages == 0`
    /// or no handler.
    ///
    /// The framebuffer claim is rounded up to the next power of two, so the
    /// pages between `pages` and the rounded size resolve to the framebuffer
    /// handler as well. Re-applying the current parameters is a no-op.
    pub fn set_lfb_window(
        &mut self,
        start_page: u32,
        pages: u32,
        handler: Option<HandlerRef>,
        mmio_handler: Option<HandlerRef>,
    ) -> Result<(), CalloutError> {
        if self.lfb.same_parameters(start_page, pages, &handler, &mmio_handler) {
            return Ok(());
        }

        if let Some(id) = self.lfb.window_id.take() {
            self.free_callout(id);
        }
        if let Some(id) = self.lfb.mmio_id.take() {
            self.free_callout(id);
        }
        self.lfb.start_page = start_page;
        self.lfb.pages = pages;
        self.lfb.handler = handler.clone();
        self.lfb.mmio_handler = mmio_handler.clone();

        let Some(handler) = handler else {
            return Ok(());
        };
        if pages == 0 {
            return Ok(());
        }

        let bus = match self.topology {
            BusTopology::Pci => BusClass::Pci,
            BusTopology::IsaOnly => BusClass::Isa,
        };

        let rounded = pages.next_power_of_two();
        let id = self.install_window(bus, start_page, rounded, handler)?;
        self.lfb.window_id = Some(id);

        if let Some(mmio_handler) = mmio_handler {
            let mmio_base = start_page + LFB_MMIO_OFFSET_PAGES;
            let id = self.install_window(bus, mmio_base, LFB_MMIO_PAGES, mmio_handler)?;
            self.lfb.mmio_id = Some(id);
        }
        Ok(())
    }

    /// Installed framebuffer window as `(start_page, pages)`, rounding not
    /// included.
    pub fn lfb_window(&self) -> Option<(u32, u32)> {
        self.lfb.window_id.map(|_| (self.lfb.start_page, self.lfb.pages))
    }

    fn install_window(
        &mut self,
        bus: BusClass,
        base_page: u32,
        pages: u32,
        handler: HandlerRef,
    ) -> Result<CalloutId, CalloutError> {
        let mask = MemMask::aligned(pages)?;
        let id = self
            .allocate_callout(bus)
            .ok_or(CalloutError::RegistryFull { bus })?;
        let resolver = Box::new(move |_page: u32| Some(handler.clone()));
        if let Err(err) = self.install_callout(id, base_page, mask, resolver) {
            error!(base_page, pages, %err, "framebuffer window install failed");
            self.free_callout(id);
            return Err(err);
        }
        Ok(id)
    }
}
