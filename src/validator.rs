// Client access validation
//
// Consulted by `Server::set_clients` for every address. Absence of a
// validator is modelled by `AllowAll`.

/// Decides whether a client address may be granted access to the exports.
pub trait ClientValidator: Send + Sync {
    fn validate_client(&self, address: &str) -> bool;
}

/// Permits every client.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl ClientValidator for AllowAll {
    fn validate_client(&self, _address: &str) -> bool {
        true
    }
}

impl<F> ClientValidator for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn validate_client(&self, address: &str) -> bool {
        self(address)
    }
}
