use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use ebicslib::{
    admin::{AdminClient, ReqwestAdmin},
    config::Config,
    diagnostics::TracingDiagnostics,
    ingest::{IngestReport, PipelineConfig, StatementIngestionPipeline},
    ini_letter::Language,
    lifecycle::IdentityLifecycleManager,
    logging,
    model::Identity,
    protocol::HttpChannel,
    sink::{AccountTable, CsvTransactionSink},
    store::FileKeyringStore,
    sync::{eligible_for_sync, sync_identity, SyncRequest},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "ebics", version, about = "EBICS-клиент: ключи, выписки, синхронизация")]
struct Cli {
    /// Файл конфигурации
    #[arg(short = 'c', long = "config", env = "EBICS_CONFIG", default_value = "ebics.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ключи, сертификаты, INI/HIA и INI-письмо
    Init {
        identity: String,
        #[arg(long, default_value = "en")]
        language: String,
        /// Куда записать INI-письмо (PDF)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
    /// Ключи банка (HPB)
    BankKeys {
        #[command(subcommand)]
        action: BankKeysAction,
    },
    /// Разрешённые типы заказов (HTD)
    Permissions {
        identity: String,
        #[arg(long, default_value = "T")]
        level: String,
    },
    /// Скачать и загрузить выписки одной идентичности
    Sync {
        identity: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        /// C52 вместо C53
        #[arg(long)]
        intraday: bool,
    },
    /// Синхронизировать все готовые идентичности
    SyncAll {
        #[arg(long)]
        intraday: bool,
    },
    /// Зарегистрировать пользователя у поставщика
    Register { identity: String },
    /// Снять регистрацию
    Deregister { identity: String },
    /// Повторно сформировать INI-письмо
    IniLetter {
        identity: String,
        #[arg(long, default_value = "en")]
        language: String,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum BankKeysAction {
    /// Скачать и показать отпечатки
    Download { identity: String },
    /// Активировать после сверки с письмом банка
    Activate { identity: String },
}

/// Флаги, которые библиотека меняет и хост обязан сохранить.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct IdentityFlags {
    initialized: bool,
    bank_keys_activated: bool,
}

struct Host {
    config: Config,
    store: Arc<FileKeyringStore>,
    flags: BTreeMap<String, IdentityFlags>,
}

impl Host {
    fn open(path: &Path) -> Result<Self> {
        let config = Config::load(path).with_context(|| format!("loading {}", path.display()))?;
        logging::init(&config.logging)?;
        let store = Arc::new(FileKeyringStore::new(&config.storage.keyring_dir)?);
        let flags = match std::fs::read(&config.storage.state_file) {
            Ok(raw) => serde_json::from_slice(&raw)
                .with_context(|| format!("reading {}", config.storage.state_file.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { config, store, flags })
    }

    fn identity(&self, name: &str) -> Result<Identity> {
        let mut identity = self.config.identity(name)?;
        let flags = self.flags.get(name).copied().unwrap_or_default();
        identity.initialized = flags.initialized;
        identity.bank_keys_activated = flags.bank_keys_activated;
        Ok(identity)
    }

    fn identities(&self) -> Result<Vec<Identity>> {
        self.config
            .identities
            .iter()
            .map(|i| self.identity(&i.name))
            .collect()
    }

    fn manager(&self, identity: Identity) -> Result<IdentityLifecycleManager> {
        let mut channel = HttpChannel::new(self.config.http.timeout())?;
        if let Some(product) = &self.config.http.product {
            channel = channel.with_product(product.as_str());
        }
        let passphrases = self.config.passphrases(&identity.name)?;
        let mut manager =
            IdentityLifecycleManager::new(identity, self.store.clone(), passphrases, Arc::new(channel));
        if let Some(admin) = &self.config.admin {
            let (Some(key), Some(secret)) = (&admin.api_key, &admin.api_secret) else {
                bail!("admin backend needs EBICS_ADMIN_API_KEY and EBICS_ADMIN_API_SECRET");
            };
            let transport = ReqwestAdmin::new(
                admin.url.as_str(),
                key.as_str(),
                SecretString::new(secret.clone()),
                self.config.http.timeout(),
            )?;
            manager = manager.with_admin(AdminClient::new(transport));
        }
        Ok(manager)
    }

    /// Сохраняет флаги атомарной заменой файла.
    fn remember(&mut self, identity: &Identity) -> Result<()> {
        self.flags.insert(
            identity.name.clone(),
            IdentityFlags {
                initialized: identity.initialized,
                bank_keys_activated: identity.bank_keys_activated,
            },
        );
        let path = &self.config.storage.state_file;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.flags)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn sync(&self, identity: &Identity, request: &SyncRequest) -> Result<IngestReport> {
        let session = self.manager(identity.clone())?.session()?;
        let accounts = AccountTable::new(self.config.accounts.clone());
        let mut sink = CsvTransactionSink::open(&self.config.storage.records_csv)?;
        let diagnostics = TracingDiagnostics;
        let mut pipeline = StatementIngestionPipeline::new(
            PipelineConfig::for_identity(identity),
            &accounts,
            &mut sink,
            &diagnostics,
        );
        Ok(sync_identity(&session, &mut pipeline, request)?)
    }
}

fn bank_name(identity: &Identity) -> String {
    identity
        .bank
        .bank_name
        .clone()
        .unwrap_or_else(|| identity.bank.name.clone())
}

fn write_letter(output: Option<PathBuf>, name: &str, pdf: &[u8]) -> Result<()> {
    let path = output.unwrap_or_else(|| PathBuf::from(format!("{name}-ini-letter.pdf")));
    std::fs::write(&path, pdf).with_context(|| format!("writing {}", path.display()))?;
    println!("INI letter written to {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut host = Host::open(&cli.config)?;

    match cli.command {
        Command::Init {
            identity,
            language,
            output,
        } => {
            let id = host.identity(&identity)?;
            let bank = bank_name(&id);
            let mut manager = host.manager(id)?;
            let result = manager.initialize(&bank, Language::from_code(&language));
            // флаги фиксируются даже при ошибке письма после INI/HIA
            host.remember(manager.identity())?;
            write_letter(output, &identity, &result?)?;
        }
        Command::BankKeys { action } => match action {
            BankKeysAction::Download { identity } => {
                let mut manager = host.manager(host.identity(&identity)?)?;
                let keys = manager.download_bank_keys()?;
                println!("Authentication (X002): {}", keys.authentication_fingerprint);
                println!("Encryption (E002):     {}", keys.encryption_fingerprint);
                println!("Compare with the bank's letter, then run `ebics bank-keys activate {identity}`.");
            }
            BankKeysAction::Activate { identity } => {
                let mut manager = host.manager(host.identity(&identity)?)?;
                manager.activate_bank_keys()?;
                host.remember(manager.identity())?;
                println!("Bank keys activated for {identity}");
            }
        },
        Command::Permissions { identity, level } => {
            let manager = host.manager(host.identity(&identity)?)?;
            for order_type in manager.permitted_order_types(&level)? {
                println!("{order_type}");
            }
        }
        Command::Sync {
            identity,
            from,
            to,
            intraday,
        } => {
            let id = host.identity(&identity)?;
            if !id.bank_keys_activated {
                bail!("{identity}: bank keys are not activated");
            }
            let request = if intraday {
                SyncRequest::intraday()
            } else {
                SyncRequest::for_range(from, to, Local::now().date_naive())
            };
            let report = host.sync(&id, &request)?;
            println!("{report:?}");
        }
        Command::SyncAll { intraday } => {
            let identities = host.identities()?;
            let request = if intraday {
                SyncRequest::intraday()
            } else {
                SyncRequest::booked(Default::default())
            };
            let mut failed = 0;
            for identity in eligible_for_sync(&identities, intraday, host.store.as_ref())? {
                match host.sync(identity, &request) {
                    Ok(report) => info!(identity = %identity.name, ?report, "synced"),
                    Err(e) => {
                        failed += 1;
                        error!(identity = %identity.name, error = %e, "sync failed");
                    }
                }
            }
            if failed > 0 {
                bail!("{failed} identities failed to sync");
            }
        }
        Command::Register { identity } => {
            let manager = host.manager(host.identity(&identity)?)?;
            println!("{:?}", manager.register_identity()?);
        }
        Command::Deregister { identity } => {
            let manager = host.manager(host.identity(&identity)?)?;
            manager.deregister_identity()?;
            println!("{identity} deregistered");
        }
        Command::IniLetter {
            identity,
            language,
            output,
        } => {
            let id = host.identity(&identity)?;
            let bank = bank_name(&id);
            let manager = host.manager(id)?;
            let pdf = manager.create_ini_letter(&bank, Language::from_code(&language))?;
            write_letter(output, &identity, &pdf)?;
        }
    }
    Ok(())
}
