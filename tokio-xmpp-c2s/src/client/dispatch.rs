use std::sync::Arc;

use minidom::Element;
use tokio::sync::{mpsc, Notify};

use crate::connect::BoxedIo;
use crate::error::Error;
use crate::event::Stanza;
use crate::observer::Observers;
use crate::xmlstream::ElementTransport;

/// Handle to queue stanzas on a client connection.
///
/// Sending never blocks: stanzas are queued and written by the connection
/// task once the session is established, in order.
#[derive(Debug, Clone)]
pub struct StanzaSender {
    tx: mpsc::UnboundedSender<Element>,
}

impl StanzaSender {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Element>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (StanzaSender { tx }, rx)
    }

    /// Queue a stanza, assigning it an ID if it has none.
    ///
    /// Returns the stanza ID, or `None` for elements which are not
    /// stanzas.
    pub fn send_stanza<S: Into<Stanza>>(&self, stanza: S) -> Result<Option<String>, Error> {
        let mut stanza = stanza.into();
        let id = stanza.ensure_id().map(String::from);
        self.send_element(stanza.into())?;
        Ok(id)
    }

    /// Queue a raw element.
    pub fn send_element(&self, elem: Element) -> Result<(), Error> {
        self.tx.send(elem).map_err(|_| Error::Disconnected)
    }
}

/// Exchange stanzas until the peer goes away or `close` is notified.
///
/// Returns `Ok` only when closed on request.
pub(crate) async fn run(
    mut transport: ElementTransport<BoxedIo>,
    observers: &Observers,
    outgoing: &mut mpsc::UnboundedReceiver<Element>,
    close: &Arc<Notify>,
) -> Result<(), Error> {
    let mut senders_alive = true;
    loop {
        tokio::select! {
            _ = close.notified() => {
                log::debug!("Closing stream on request");
                transport.close().await?;
                return Ok(());
            }
            elem = outgoing.recv(), if senders_alive => match elem {
                Some(elem) => transport.write_next(&elem).await?,
                None => senders_alive = false,
            },
            elem = transport.read_next() => {
                let elem = elem?;
                if let Some(reply) = dispatch(elem, observers)? {
                    transport.write_next(&reply).await?;
                }
            }
        }
    }
}

/// Hand an inbound element to the observers, returning the IQ reply to
/// send, if any.
fn dispatch(elem: Element, observers: &Observers) -> Result<Option<Element>, Error> {
    match Stanza::classify(elem) {
        Ok(Stanza::Iq(iq)) => {
            observers.iq(&iq);
            Ok(observers.answer(&iq).map(Element::from))
        }
        Ok(Stanza::Message(message)) => {
            observers.message(&message);
            Ok(None)
        }
        Ok(Stanza::Presence(presence)) => {
            observers.presence(&presence);
            Ok(None)
        }
        Ok(Stanza::StreamError(error)) => {
            log::error!("Received stream error: {}", error);
            Err(Error::ReceivedStreamError(error))
        }
        Ok(Stanza::Other(elem)) => {
            log::debug!("Unhandled <{} xmlns='{}'/>", elem.name(), elem.ns());
            Ok(None)
        }
        Err(e) => {
            log::warn!("Dropping malformed stanza: {}", e);
            Ok(None)
        }
    }
}
