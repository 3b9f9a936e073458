// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection-level and stream-level flow control windows
//!
//! The transmitting side tracks the credit the peer has granted; the
//! receiving side decides when to grant more. Window increases are
//! advertised once the application has consumed half the window, and
//! advertised values never decrease.

use quell_quic_core::{transport, transport_error, varint::VarInt};

/// Credit granted by the peer, consumed by sending
#[derive(Clone, Debug)]
pub struct TxWindow {
    /// The peer's current limit, in bytes or streams
    limit: VarInt,
    /// How much of the limit has been consumed
    consumed: VarInt,
    /// The limit value a blocked frame was last sent for, to avoid
    /// repeating it for the same value
    blocked_sent_at: Option<VarInt>,
}

impl TxWindow {
    pub fn new(initial_limit: VarInt) -> Self {
        Self {
            limit: initial_limit,
            consumed: VarInt::ZERO,
            blocked_sent_at: None,
        }
    }

    #[inline]
    pub fn limit(&self) -> VarInt {
        self.limit
    }

    #[inline]
    pub fn consumed(&self) -> VarInt {
        self.consumed
    }

    /// Bytes that may still be consumed
    #[inline]
    pub fn available(&self) -> u64 {
        self.limit.as_u64() - self.consumed.as_u64()
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-4.1
    //# A sender MUST ignore any MAX_STREAM_DATA or MAX_DATA frames that do
    //# not increase flow control limits.
    pub fn on_limit_update(&mut self, limit: VarInt) -> bool {
        if limit > self.limit {
            self.limit = limit;
            true
        } else {
            false
        }
    }

    /// Consumes `len` bytes of credit
    pub fn consume(&mut self, len: usize) {
        debug_assert!(len as u64 <= self.available());
        self.consumed = self.consumed.saturating_add(
            VarInt::try_from(len).unwrap_or(VarInt::MAX),
        );
    }

    /// Returns the blocked frame value to send, at most once per distinct
    /// limit
    //= https://www.rfc-editor.org/rfc/rfc9000#section-4.1
    //# To keep the connection from closing, a sender that is flow control
    //# limited SHOULD periodically send a STREAM_DATA_BLOCKED or
    //# DATA_BLOCKED frame when it has data to send but is unable to do so.
    pub fn blocked_frame_value(&mut self) -> Option<VarInt> {
        if self.available() > 0 {
            return None;
        }
        if self.blocked_sent_at == Some(self.limit) {
            return None;
        }
        self.blocked_sent_at = Some(self.limit);
        Some(self.limit)
    }
}

/// Credit we grant to the peer, replenished as data is consumed
#[derive(Clone, Debug)]
pub struct RxWindow {
    /// The limit most recently advertised to the peer
    advertised: VarInt,
    /// The size of the window granted beyond consumed data
    window: VarInt,
    /// The highest offset/count received from the peer
    received: VarInt,
    /// The amount the application has consumed
    consumed: VarInt,
    /// Set when a new advertisement should be transmitted
    update_pending: bool,
    /// Set when the frame carrying the current advertisement was lost or
    /// did not fit and must be sent again
    retransmit_pending: bool,
}

impl RxWindow {
    pub fn new(window: VarInt) -> Self {
        Self {
            advertised: window,
            window,
            received: VarInt::ZERO,
            consumed: VarInt::ZERO,
            update_pending: false,
            retransmit_pending: false,
        }
    }

    #[inline]
    pub fn advertised(&self) -> VarInt {
        self.advertised
    }

    #[inline]
    pub fn received(&self) -> VarInt {
        self.received
    }

    /// Records receipt of data up to `offset`.
    ///
    //= https://www.rfc-editor.org/rfc/rfc9000#section-4.1
    //# A receiver MUST close the connection with an error of type
    //# FLOW_CONTROL_ERROR if the sender violates the advertised connection
    //# or stream data limits
    pub fn on_data_received(&mut self, offset: VarInt) -> Result<(), transport::Error> {
        if offset > self.advertised {
            return Err(transport_error!(
                FLOW_CONTROL_ERROR,
                "peer exceeded advertised limit"
            ));
        }
        self.received = self.received.max(offset);
        Ok(())
    }

    /// Records consumption by the application and schedules a window
    /// update once half the window has been released
    pub fn on_data_consumed(&mut self, len: usize) {
        self.consumed = self
            .consumed
            .saturating_add(VarInt::try_from(len).unwrap_or(VarInt::MAX));

        let next = self.consumed.saturating_add(self.window);
        // re-advertise when half the window has been consumed
        if next.as_u64() - self.advertised.as_u64() >= self.window.as_u64() / 2 {
            self.update_pending = true;
        }
    }

    /// Reclaims allowance for a reset stream whose final size is known
    pub fn on_stream_reset(&mut self, final_size: VarInt) {
        let unread = final_size.saturating_sub(self.consumed);
        self.on_data_consumed(unread.as_u64() as usize);
    }

    /// Returns the limit to advertise, if an update is due.
    ///
    /// The value is monotonically non-decreasing. A value handed out here
    /// is considered sent; callers that fail to transmit it must call
    /// [`Self::request_update`].
    pub fn window_update(&mut self) -> Option<VarInt> {
        if self.update_pending {
            self.update_pending = false;
            let next = self.consumed.saturating_add(self.window);
            if next > self.advertised {
                self.advertised = next;
                self.retransmit_pending = false;
                return Some(next);
            }
        }

        // a previously handed-out value whose frame was lost is offered
        // again; re-sending the same limit keeps the advertisement
        // monotone
        if self.retransmit_pending {
            self.retransmit_pending = false;
            return Some(self.advertised);
        }

        None
    }

    /// Re-queues the current advertisement after the frame carrying it
    /// was lost or did not fit in a packet
    pub fn request_update(&mut self) {
        self.retransmit_pending = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_window_consume_and_update() {
        let mut window = TxWindow::new(VarInt::from_u32(1000));
        assert_eq!(window.available(), 1000);

        window.consume(600);
        assert_eq!(window.available(), 400);

        // limits never decrease
        assert!(!window.on_limit_update(VarInt::from_u32(500)));
        assert!(window.on_limit_update(VarInt::from_u32(2000)));
        assert_eq!(window.available(), 1400);
    }

    #[test]
    fn blocked_frame_dedup() {
        let mut window = TxWindow::new(VarInt::from_u32(10));
        window.consume(10);

        assert_eq!(window.blocked_frame_value(), Some(VarInt::from_u32(10)));
        // the same limit is not reported twice
        assert_eq!(window.blocked_frame_value(), None);

        window.on_limit_update(VarInt::from_u32(20));
        window.consume(10);
        assert_eq!(window.blocked_frame_value(), Some(VarInt::from_u32(20)));
    }

    #[test]
    fn rx_window_violation() {
        let mut window = RxWindow::new(VarInt::from_u32(100));
        assert!(window.on_data_received(VarInt::from_u32(100)).is_ok());
        assert!(window.on_data_received(VarInt::from_u32(101)).is_err());
    }

    #[test]
    fn rx_window_update_at_half() {
        let mut window = RxWindow::new(VarInt::from_u32(100));
        assert!(window.window_update().is_none());

        window.on_data_received(VarInt::from_u32(40)).unwrap();
        window.on_data_consumed(40);
        // 40 consumed < half the window
        assert!(window.window_update().is_none());

        window.on_data_received(VarInt::from_u32(60)).unwrap();
        window.on_data_consumed(20);
        // 60 consumed >= half: advertise consumed + window
        assert_eq!(window.window_update(), Some(VarInt::from_u32(160)));
        // advertisement is monotone and one-shot
        assert!(window.window_update().is_none());
    }

    #[test]
    fn lost_update_is_offered_again() {
        let mut window = RxWindow::new(VarInt::from_u32(100));
        window.on_data_received(VarInt::from_u32(60)).unwrap();
        window.on_data_consumed(60);
        assert_eq!(window.window_update(), Some(VarInt::from_u32(160)));

        // the frame carrying the advertisement was lost; the same value
        // must come out again
        window.request_update();
        assert_eq!(window.window_update(), Some(VarInt::from_u32(160)));
        assert!(window.window_update().is_none());

        // further consumption takes precedence over a retransmission
        window.on_data_received(VarInt::from_u32(120)).unwrap();
        window.on_data_consumed(60);
        window.request_update();
        assert_eq!(window.window_update(), Some(VarInt::from_u32(220)));
        assert!(window.window_update().is_none());
    }
}
