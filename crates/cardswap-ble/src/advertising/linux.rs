//! Linux peripheral implementation using bluer (BlueZ)

use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicRead, CharacteristicReadRequest,
    ReqError, Service,
};
use cardswap_core::{AdvertiseSettings, EndpointId, EventSink, ServiceMarker};
use futures::FutureExt;
use tracing::{debug, info, warn};

use crate::config::BleDriverConfig;
use crate::error::{advertise_failure, BleDriverError};
use crate::requests::ReadBridge;

use super::BleAdvertiser;

// ----------------------------------------------------------------------------
// Linux Implementation
// ----------------------------------------------------------------------------

pub struct LinuxAdvertiser {
    adapter_index: usize,
    power_on: bool,
    session: Option<bluer::Session>,
    adapter: Option<bluer::Adapter>,
    advertisement: Option<AdvertisementHandle>,
    application: Option<ApplicationHandle>,
}

impl LinuxAdvertiser {
    pub fn new(config: &BleDriverConfig) -> Self {
        Self {
            adapter_index: config.adapter_index,
            power_on: config.power_on,
            session: None,
            adapter: None,
            advertisement: None,
            application: None,
        }
    }

    async fn adapter(&mut self) -> Result<&bluer::Adapter, BleDriverError> {
        if self.adapter.is_none() {
            let session = bluer::Session::new().await?;
            let names = session.adapter_names().await?;
            let name = names
                .get(self.adapter_index)
                .ok_or(BleDriverError::AdapterNotAvailable)?;
            let adapter = session.adapter(name)?;

            if self.power_on && !adapter.is_powered().await.unwrap_or(false) {
                adapter.set_powered(true).await?;
            }

            info!("BlueZ adapter {} initialized for advertising", adapter.name());
            self.session = Some(session);
            self.adapter = Some(adapter);
        }

        self.adapter.as_ref().ok_or(BleDriverError::AdapterNotAvailable)
    }
}

#[async_trait::async_trait]
impl BleAdvertiser for LinuxAdvertiser {
    async fn radio_powered(&mut self) -> Result<bool, BleDriverError> {
        Ok(self.adapter().await?.is_powered().await?)
    }

    async fn start_advertising(
        &mut self,
        marker: ServiceMarker,
        settings: &AdvertiseSettings,
        config: &BleDriverConfig,
    ) -> Result<(), BleDriverError> {
        if self.advertisement.is_some() {
            return Err(BleDriverError::AdvertiseRejected(
                cardswap_core::AdvertiseFailure::AlreadyStarted,
            ));
        }

        let adapter = self.adapter().await?;
        let local_name = if settings.include_device_name {
            match &config.local_name {
                Some(name) => Some(name.clone()),
                None => adapter.alias().await.ok(),
            }
        } else {
            None
        };

        let advertisement = Advertisement {
            advertisement_type: if settings.connectable {
                AdvertisementType::Peripheral
            } else {
                AdvertisementType::Broadcast
            },
            service_uuids: vec![marker.0].into_iter().collect(),
            discoverable: Some(true),
            local_name,
            ..Default::default()
        };
        debug!("Advertising with radio mode {:?}", settings.mode);

        let handle = adapter
            .advertise(advertisement)
            .await
            .map_err(|e| BleDriverError::AdvertiseRejected(advertise_failure(&e)))?;

        self.advertisement = Some(handle);
        info!("Started BLE advertising for service {}", marker);
        Ok(())
    }

    async fn stop_advertising(&mut self) -> Result<(), BleDriverError> {
        if let Some(handle) = self.advertisement.take() {
            drop(handle); // Dropping the handle unregisters the advertisement
            info!("Stopped BLE advertising");
        }
        Ok(())
    }

    async fn serve(
        &mut self,
        marker: ServiceMarker,
        endpoint: EndpointId,
        bridge: ReadBridge,
        sink: EventSink,
    ) -> Result<(), BleDriverError> {
        if self.application.is_some() {
            return Err(BleDriverError::ServerAlreadyRunning);
        }

        let card = Characteristic {
            uuid: endpoint.0,
            read: Some(CharacteristicRead {
                read: true,
                fun: Box::new(move |req: CharacteristicReadRequest| {
                    let bridge = bridge.clone();
                    let sink = sink.clone();
                    async move {
                        let peer = Some(req.device_address.to_string());
                        bridge
                            .request(endpoint, peer, usize::from(req.offset), &sink)
                            .await
                            .map_err(|e| {
                                warn!("Failed to answer card read: {}", e);
                                ReqError::Failed
                            })
                    }
                    .boxed()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let application = Application {
            services: vec![Service {
                uuid: marker.0,
                primary: true,
                characteristics: vec![card],
                ..Default::default()
            }],
            ..Default::default()
        };

        let handle = self.adapter().await?.serve_gatt_application(application).await?;
        self.application = Some(handle);
        info!("Serving card characteristic {} under {}", endpoint, marker);
        Ok(())
    }

    async fn stop_serving(&mut self) -> Result<(), BleDriverError> {
        if let Some(handle) = self.application.take() {
            drop(handle);
            info!("Unregistered GATT service");
        }
        Ok(())
    }
}
