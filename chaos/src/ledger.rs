//! Submit ledger transactions and queries.
//!
//! [Ledger] is the boundary with the ledger itself: granting or revoking a node's validator
//! service, reading the live services of every node, collecting validator info through the pool,
//! and writing a NYM to check the pool accepts writes.
//!
//! [IndyCli] implements it by running the ledger client on a designated client host. The client
//! reads a batch of line-oriented commands from a file and exits with status zero even when one of
//! them fails, so success is read from its output.

use crate::{config::LedgerConfig, genesis::Node, Error};
use indy_remote::{quote, Executor, Output};
use std::{collections::BTreeMap, future::Future};
use tracing::{debug, warn};

/// Printed once a node transaction has been submitted.
const NODE_SENT: &str = "NodeConfig request has been sent to Ledger.";

/// Printed once a NYM transaction has been submitted.
const NYM_SENT: &str = "Nym request has been sent to Ledger.";

/// Service flag held by nodes that take part in consensus.
pub const VALIDATOR: &str = "VALIDATOR";

/// Services a node transaction can grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Services {
    Validator,
    None,
}

impl Services {
    pub fn as_str(&self) -> &'static str {
        match self {
            Services::Validator => VALIDATOR,
            Services::None => "",
        }
    }
}

/// Interface to the ledger of the pool under experiment.
pub trait Ledger: Clone + Send + Sync + 'static {
    /// Submit a node transaction setting the services of `node`.
    ///
    /// Returns false if the transaction was not accepted.
    fn set_services(
        &self,
        node: &Node,
        services: Services,
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Live services of every node on the pool ledger.
    fn validator_services(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<String, Vec<String>>, Error>> + Send;

    /// Validator info of every reachable node, one marker line and one JSON line per node.
    fn validator_info(&self) -> impl Future<Output = Result<String, Error>> + Send;

    /// Write a NYM for a freshly created DID.
    fn write_nym(&self) -> impl Future<Output = Result<bool, Error>> + Send;
}

/// [Ledger] driven by the ledger client on `client`.
#[derive(Clone)]
pub struct IndyCli<E: Executor> {
    executor: E,
    cfg: LedgerConfig,
}

impl<E: Executor> IndyCli<E> {
    pub fn new(executor: E, cfg: LedgerConfig) -> Self {
        Self { executor, cfg }
    }

    async fn execute(&self, command: &str) -> Result<Output, Error> {
        match self
            .executor
            .execute(&self.cfg.client, command, false, self.cfg.timeout)
            .await
        {
            Err(indy_remote::Error::Timeout { timeout, .. }) => Err(Error::LedgerTimeout(timeout)),
            result => Ok(result?),
        }
    }

    /// Run `commands` in one client session, returning its output.
    async fn batch(&self, commands: &[String]) -> Result<String, Error> {
        let output = self.execute(&batch_script(&self.cfg.binary, commands)).await?;
        if !output.success() {
            return Err(Error::Ledger(output.stderr.trim().to_string()));
        }
        debug!(client = %self.cfg.client, stdout = %output.stdout, "ledger client finished");
        Ok(output.stdout)
    }

    fn open_wallet(&self) -> String {
        match &self.cfg.wallet_key {
            Some(key) => format!("wallet open {} key={key}", self.cfg.wallet_name),
            None => format!("wallet open {} key", self.cfg.wallet_name),
        }
    }

    /// Create the pool, wallet, and trustee DID if they do not exist yet.
    ///
    /// Each step fails harmlessly once it has succeeded before.
    async fn prepare(&self) -> Result<(), Error> {
        let mut steps = vec![
            vec![format!(
                "pool create {} gen_txn_file={}",
                self.cfg.pool, self.cfg.genesis
            )],
            vec![match &self.cfg.wallet_key {
                Some(key) => format!(
                    "wallet create {} pool_name={} key={key}",
                    self.cfg.wallet_name, self.cfg.pool
                ),
                None => format!(
                    "wallet create {} pool_name={} key",
                    self.cfg.wallet_name, self.cfg.pool
                ),
            }],
        ];
        if let Some(seed) = &self.cfg.seed {
            steps.push(vec![self.open_wallet(), format!("did new seed={seed}")]);
        }
        for step in steps {
            match self.batch(&step).await {
                Ok(_) => {}
                Err(Error::Ledger(reason)) => debug!(%reason, "ledger setup step failed"),
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Commands that open a signing session connected to the pool.
    fn session(&self) -> Vec<String> {
        vec![
            self.open_wallet(),
            format!("did use {}", self.cfg.did),
            format!("pool connect {}", self.cfg.pool),
        ]
    }
}

impl<E: Executor> Ledger for IndyCli<E> {
    async fn set_services(&self, node: &Node, services: Services) -> Result<bool, Error> {
        self.prepare().await?;
        let mut commands = self.session();
        commands.push(format!(
            "ledger node target={} alias={} services={}",
            node.dest,
            node.alias,
            services.as_str()
        ));
        let stdout = self.batch(&commands).await?;
        if !stdout.contains(NODE_SENT) {
            warn!(alias = %node.alias, services = services.as_str(), "node transaction rejected");
            return Ok(false);
        }
        Ok(true)
    }

    async fn validator_services(&self) -> Result<BTreeMap<String, Vec<String>>, Error> {
        let output = self.execute(&self.cfg.services_command).await?;
        if !output.success() {
            return Err(Error::Ledger(output.stderr.trim().to_string()));
        }
        let services: BTreeMap<String, Option<Vec<String>>> =
            serde_json::from_str(output.stdout.trim())?;
        Ok(services
            .into_iter()
            .map(|(alias, services)| (alias, services.unwrap_or_default()))
            .collect())
    }

    async fn validator_info(&self) -> Result<String, Error> {
        self.prepare().await?;
        let mut commands = self.session();
        commands.push("ledger get-validator-info".to_string());
        self.batch(&commands).await
    }

    async fn write_nym(&self) -> Result<bool, Error> {
        self.prepare().await?;
        let stdout = self.batch(&[self.open_wallet(), "did new".to_string()]).await?;
        let Some((did, verkey)) = created_did(&stdout) else {
            warn!("failed to create DID");
            return Ok(false);
        };
        let mut commands = self.session();
        commands.push(format!("ledger nym did={did} verkey={verkey}"));
        let stdout = self.batch(&commands).await?;
        if !stdout.contains(NYM_SENT) {
            warn!(%did, "NYM transaction rejected");
            return Ok(false);
        }
        Ok(true)
    }
}

/// Shell command that feeds `commands` (then `exit`) to `binary` through a temporary file.
pub fn batch_script(binary: &str, commands: &[String]) -> String {
    let lines = commands
        .iter()
        .map(|command| quote(command))
        .chain(std::iter::once(quote("exit")))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "f=$(mktemp) && printf '%s\\n' {lines} > \"$f\" && {} \"$f\"; rc=$?; rm -f \"$f\"; exit $rc",
        quote(binary)
    )
}

/// Extract the DID and verkey from `Did "<did>" has been created with "<verkey>" verkey`.
fn created_did(stdout: &str) -> Option<(String, String)> {
    let line = stdout
        .lines()
        .find(|line| line.contains("has been created with"))?;
    let mut quoted = line.split('"').skip(1).step_by(2);
    let did = quoted.next()?;
    let verkey = quoted.next()?;
    Some((did.to_string(), verkey.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indy_remote::mocks::Mock;
    use std::time::Duration;

    fn node() -> Node {
        Node {
            alias: "Node3".into(),
            client_ip: "10.0.0.3".into(),
            client_port: 9706,
            node_ip: "10.0.0.3".into(),
            node_port: 9705,
            dest: "DKVxG2fXXTU8yT5N7hGEbXB3dfdAnYv1JczDUHpmDxya".into(),
            services: vec![VALIDATOR.into()],
        }
    }

    fn config() -> LedgerConfig {
        LedgerConfig {
            client: "client1".into(),
            timeout: Duration::from_secs(5),
            ..LedgerConfig::default()
        }
    }

    #[test]
    fn test_batch_script() {
        let script = batch_script(
            "indy-cli",
            &["wallet open w key=k".to_string(), "did use it's".to_string()],
        );
        assert_eq!(
            script,
            "f=$(mktemp) && printf '%s\\n' 'wallet open w key=k' 'did use it'\\''s' 'exit' > \"$f\" && 'indy-cli' \"$f\"; rc=$?; rm -f \"$f\"; exit $rc"
        );
    }

    #[test]
    fn test_created_did() {
        let stdout = "Wallet \"chaosindy\" has been opened\nDid \"Th7MpTaRZVRYnPiabds81Y\" has been created with \"~7TYfekw4GUagBnBVCqPjiC\" verkey\n";
        assert_eq!(
            created_did(stdout),
            Some(("Th7MpTaRZVRYnPiabds81Y".into(), "~7TYfekw4GUagBnBVCqPjiC".into()))
        );
        assert_eq!(created_did("Wallet \"chaosindy\" has been opened"), None);
    }

    #[tokio::test]
    async fn test_set_services() {
        let mock = Mock::new(|call| {
            if call.command.contains("ledger node") {
                return Ok(Output::new(0, format!("{NODE_SENT}\n"), ""));
            }
            Ok(Output::new(0, "Pool config \"chaosindy\" already exists\n", ""))
        });
        let ledger = IndyCli::new(mock.clone(), config());
        assert!(ledger.set_services(&node(), Services::None).await.unwrap());

        let commands = mock.commands("client1");
        let last = commands.last().unwrap();
        assert!(last.contains(
            "'ledger node target=DKVxG2fXXTU8yT5N7hGEbXB3dfdAnYv1JczDUHpmDxya alias=Node3 services='"
        ));
        assert!(last.contains("'did use V4SGRU86Z58d6TV7PBUe6f'"));

        // Pool, wallet, and DID are prepared first
        assert_eq!(commands.len(), 4);
        assert!(commands[0].contains("pool create chaosindy"));
        assert!(mock.calls().iter().all(|call| !call.superuser));
    }

    #[tokio::test]
    async fn test_set_services_rejected() {
        // The client exits zero even when the transaction fails
        let mock = Mock::new(|_| {
            Ok(Output::new(
                0,
                "Transaction has been rejected: client request invalid\n",
                "",
            ))
        });
        let ledger = IndyCli::new(mock, config());
        assert!(!ledger
            .set_services(&node(), Services::Validator)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_timeout() {
        let mock = Mock::new(|call| {
            Err(indy_remote::Error::Timeout {
                host: call.host.clone(),
                timeout: call.timeout,
            })
        });
        let ledger = IndyCli::new(mock, config());
        assert!(matches!(
            ledger.validator_info().await,
            Err(Error::LedgerTimeout(t)) if t == Duration::from_secs(5)
        ));
    }

    #[tokio::test]
    async fn test_authentication_propagates() {
        let mock = Mock::new(|call| {
            Err(indy_remote::Error::Authentication {
                host: call.host.clone(),
                reason: "Permission denied (publickey).".into(),
            })
        });
        let ledger = IndyCli::new(mock.clone(), config());
        assert!(matches!(
            ledger.write_nym().await,
            Err(Error::Remote(indy_remote::Error::Authentication { .. }))
        ));
        assert_eq!(mock.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_validator_services() {
        let mock = Mock::new(|_| {
            Ok(Output::new(
                0,
                r#"{"Node1": ["VALIDATOR"], "Node2": [], "Node3": null}"#,
                "",
            ))
        });
        let ledger = IndyCli::new(mock, config());
        let services = ledger.validator_services().await.unwrap();
        assert_eq!(services["Node1"], vec![VALIDATOR]);
        assert!(services["Node2"].is_empty());
        assert!(services["Node3"].is_empty());
    }

    #[tokio::test]
    async fn test_write_nym() {
        let mock = Mock::new(|call| {
            if call.command.contains("'did new'") {
                return Ok(Output::new(
                    0,
                    "Did \"Th7MpTaRZVRYnPiabds81Y\" has been created with \"~7TYfekw4GUagBnBVCqPjiC\" verkey\n",
                    "",
                ));
            }
            if call.command.contains("ledger nym") {
                return Ok(Output::new(0, format!("{NYM_SENT}\n"), ""));
            }
            Ok(Output::default())
        });
        let ledger = IndyCli::new(mock.clone(), config());
        assert!(ledger.write_nym().await.unwrap());
        let commands = mock.commands("client1");
        assert!(commands
            .last()
            .unwrap()
            .contains("'ledger nym did=Th7MpTaRZVRYnPiabds81Y verkey=~7TYfekw4GUagBnBVCqPjiC'"));
    }
}
