use std::sync::Arc;

use a5_types::events::GatewayCommand;

use crate::error::TransportError;

/// Outbound half of the cable. Sending is fire-and-forget: errors only say
/// the command could not be handed to the connection.
pub trait Transport {
    fn send(&self, command: GatewayCommand) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, command: GatewayCommand) -> Result<(), TransportError> {
        (**self).send(command)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, command: GatewayCommand) -> Result<(), TransportError> {
        (**self).send(command)
    }
}
